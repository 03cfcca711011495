//! Resource model.
//!
//! A [`ProjectSpec`] is the resolved, validated description of a project: an
//! ordered list of [`ResourceSpec`]s plus optional hooks and alternate
//! layouts. The schema is closed; unknown keys are rejected when a project
//! file is loaded.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::expand_tilde;
use crate::host::HostEntity;
use crate::tag::Placement;
use crate::util::is_identifier;
use crate::{Error, Result};

const MAX_NAME_LENGTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Editor,
    Terminal,
    Browser,
    #[default]
    App,
    Custom,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Editor => "editor",
            ResourceKind::Terminal => "terminal",
            ResourceKind::Browser => "browser",
            ResourceKind::App => "app",
            ResourceKind::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// How a reusable resource recognises an existing host entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchPredicate {
    /// Entity's working directory equals the resource's.
    Workdir,
    /// Entity's title matches a regular expression.
    Title(String),
    /// Entity runs the same program.
    Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReusePolicy {
    #[default]
    AlwaysNew,
    ReuseIfMatch(MatchPredicate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ReuseMode {
    AlwaysNew,
    ReuseIfMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MatchKind {
    Workdir,
    Title,
    Command,
}

/// On-disk shape of a reuse policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReuseDecl {
    policy: ReuseMode,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    matcher: Option<MatchKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,
}

impl TryFrom<ReuseDecl> for ReusePolicy {
    type Error = String;

    fn try_from(decl: ReuseDecl) -> std::result::Result<Self, Self::Error> {
        match (decl.policy, decl.matcher, decl.pattern) {
            (ReuseMode::AlwaysNew, None, None) => Ok(ReusePolicy::AlwaysNew),
            (ReuseMode::AlwaysNew, _, _) => {
                Err("'always-new' does not take 'match' or 'pattern'".to_string())
            }
            (ReuseMode::ReuseIfMatch, None, _) => {
                Err("'reuse-if-match' requires a 'match' predicate".to_string())
            }
            (ReuseMode::ReuseIfMatch, Some(MatchKind::Title), Some(pattern)) => {
                Ok(ReusePolicy::ReuseIfMatch(MatchPredicate::Title(pattern)))
            }
            (ReuseMode::ReuseIfMatch, Some(MatchKind::Title), None) => {
                Err("'title' match requires a 'pattern'".to_string())
            }
            (ReuseMode::ReuseIfMatch, Some(_), Some(_)) => {
                Err("'pattern' is only valid with 'title' match".to_string())
            }
            (ReuseMode::ReuseIfMatch, Some(MatchKind::Workdir), None) => {
                Ok(ReusePolicy::ReuseIfMatch(MatchPredicate::Workdir))
            }
            (ReuseMode::ReuseIfMatch, Some(MatchKind::Command), None) => {
                Ok(ReusePolicy::ReuseIfMatch(MatchPredicate::Command))
            }
        }
    }
}

impl From<ReusePolicy> for ReuseDecl {
    fn from(policy: ReusePolicy) -> Self {
        match policy {
            ReusePolicy::AlwaysNew => ReuseDecl {
                policy: ReuseMode::AlwaysNew,
                matcher: None,
                pattern: None,
            },
            ReusePolicy::ReuseIfMatch(predicate) => {
                let (matcher, pattern) = match predicate {
                    MatchPredicate::Workdir => (MatchKind::Workdir, None),
                    MatchPredicate::Title(p) => (MatchKind::Title, Some(p)),
                    MatchPredicate::Command => (MatchKind::Command, None),
                };
                ReuseDecl {
                    policy: ReuseMode::ReuseIfMatch,
                    matcher: Some(matcher),
                    pattern,
                }
            }
        }
    }
}

impl Serialize for ReusePolicy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        ReuseDecl::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ReusePolicy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let decl = ReuseDecl::deserialize(deserializer)?;
        ReusePolicy::try_from(decl).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hooks {
    pub start: Option<String>,
    pub stop: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    pub id: String,
    #[serde(default)]
    pub kind: ResourceKind,
    /// Program to launch; whitespace separates leading arguments.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Appended to the argument list (browsers).
    #[serde(default)]
    pub urls: Vec<String>,
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub reuse: ReusePolicy,
    /// Overrides the kind's default for shutdown signalling.
    pub interactive: Option<bool>,
}

impl ResourceSpec {
    /// Full argument vector: command words, then args, then urls.
    pub fn argv(&self) -> Vec<String> {
        self.command
            .split_whitespace()
            .map(String::from)
            .chain(self.args.iter().cloned())
            .chain(self.urls.iter().cloned())
            .collect()
    }

    pub fn program(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or("")
    }

    /// Interactive resources are interrupted rather than terminated on stop.
    pub fn is_interactive(&self) -> bool {
        self.interactive
            .unwrap_or(self.kind == ResourceKind::Terminal)
    }

    fn validate(&self) -> Result<()> {
        validate_name("Resource id", &self.id)?;
        if self.command.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Resource '{}' has an empty command",
                self.id
            )));
        }
        if let ReusePolicy::ReuseIfMatch(MatchPredicate::Title(pattern)) = &self.reuse {
            Regex::new(pattern).map_err(|e| {
                Error::Validation(format!(
                    "Resource '{}' has an invalid title pattern: {}",
                    self.id, e
                ))
            })?;
        }
        if self.env.keys().any(|k| k.is_empty() || k.contains('=')) {
            return Err(Error::Validation(format!(
                "Resource '{}' has an invalid environment variable name",
                self.id
            )));
        }
        Ok(())
    }
}

impl MatchPredicate {
    /// Whether `entity` satisfies this predicate for `resource`.
    pub fn matches(
        &self,
        resource: &ResourceSpec,
        workdir: Option<&Path>,
        entity: &HostEntity,
    ) -> bool {
        match self {
            MatchPredicate::Workdir => match (workdir, entity.workdir.as_deref()) {
                (Some(want), Some(have)) => normalize(want) == normalize(have),
                _ => false,
            },
            MatchPredicate::Title(pattern) => Regex::new(pattern)
                .map(|re| re.is_match(&entity.title))
                .unwrap_or(false),
            MatchPredicate::Command => {
                let program = resource.program();
                let base = Path::new(program)
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or(program);
                !base.is_empty() && entity.command == base
            }
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSpec {
    pub name: String,
    /// Default working directory for resources and hooks.
    pub workdir: Option<String>,
    #[serde(default)]
    pub hooks: Hooks,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    /// Alternate placements keyed by layout name, then resource id.
    #[serde(default)]
    pub layouts: BTreeMap<String, BTreeMap<String, Placement>>,
}

impl ProjectSpec {
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "ProjectSpec::load");
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if !path.exists() {
            return Err(Error::ProjectNotFound(stem));
        }
        let contents = fs::read_to_string(path)?;
        let spec = Self::from_toml_str(&contents).map_err(|e| match e {
            Error::Validation(msg) => {
                Error::Validation(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        // Stop and resume address the project by file name.
        if spec.name != stem {
            return Err(Error::Validation(format!(
                "{}: project name '{}' does not match file name '{}'",
                path.display(),
                spec.name,
                stem
            )));
        }
        debug!(
            project = %spec.name,
            resources = spec.resources.len(),
            "Project loaded"
        );
        Ok(spec)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let spec: Self =
            toml::from_str(contents).map_err(|e| Error::Validation(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Names of all project files in `dir`, sorted.
    pub fn list(dir: &Path) -> Result<Vec<String>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.extension().map(|e| e == "toml").unwrap_or(false))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("Project name", &self.name)?;

        let mut seen = HashSet::new();
        for resource in &self.resources {
            resource.validate()?;
            if !seen.insert(resource.id.as_str()) {
                return Err(Error::Validation(format!(
                    "Duplicate resource id '{}' in project '{}'",
                    resource.id, self.name
                )));
            }
        }

        for (layout, placements) in &self.layouts {
            for id in placements.keys() {
                if !seen.contains(id.as_str()) {
                    return Err(Error::Validation(format!(
                        "Layout '{}' refers to unknown resource '{}'",
                        layout, id
                    )));
                }
            }
        }

        for (hook, cmd) in [("start", &self.hooks.start), ("stop", &self.hooks.stop)] {
            if matches!(cmd, Some(c) if c.trim().is_empty()) {
                return Err(Error::Validation(format!("{} hook cannot be empty", hook)));
            }
        }

        Ok(())
    }

    pub fn resource(&self, id: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Placement of every resource in declared order under `layout`.
    pub fn placements(&self, layout: Option<&str>) -> Result<Vec<Placement>> {
        let overrides = match layout {
            Some(name) => Some(self.layouts.get(name).ok_or_else(|| {
                Error::Validation(format!(
                    "Project '{}' has no layout named '{}'",
                    self.name, name
                ))
            })?),
            None => None,
        };
        Ok(self
            .resources
            .iter()
            .map(|r| {
                overrides
                    .and_then(|o| o.get(&r.id))
                    .unwrap_or(&r.placement)
                    .clone()
            })
            .collect())
    }

    pub fn project_workdir(&self) -> Option<PathBuf> {
        self.workdir.as_deref().map(expand_tilde)
    }

    /// Working directory for a resource, falling back to the project's.
    pub fn workdir_for(&self, resource: &ResourceSpec) -> Option<PathBuf> {
        resource
            .workdir
            .as_deref()
            .map(expand_tilde)
            .or_else(|| self.project_workdir())
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation(format!("{} cannot be empty", what)));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::Validation(format!(
            "{} too long (max {} characters)",
            what, MAX_NAME_LENGTH
        )));
    }
    if !is_identifier(name) {
        return Err(Error::Validation(format!(
            "{} '{}' may only contain letters, digits, '-' and '_'",
            what, name
        )));
    }
    Ok(())
}
