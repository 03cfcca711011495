//! tmux-backed host.
//!
//! One tmux session is the screen: its windows are tags (window index for
//! numeric tags, the `@loom_tag` window option for named tags) and its panes
//! are entities. Entity properties are pane user options, which outlive the
//! loom process for as long as the tmux server runs.

use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, trace, warn};

use super::{
    EntityFilter, EntityId, Host, HostEntity, NotifyLevel, ShutdownSignal, SpawnRequest,
    SpawnToken, SPAWN_PROPERTY,
};
use crate::tag::Tag;
use crate::util::shell_escape;
use crate::{Error, Result};

const TAG_OPTION: &str = "@loom_tag";
const PANE_FORMAT: &str = "#{pane_id}\t#{pane_pid}\t#{window_index}\t#{@loom_tag}\t#{pane_title}\t#{pane_current_path}\t#{pane_current_command}\t#{@loom_owner}\t#{@loom_spawn}";
const WINDOW_FORMAT: &str = "#{window_index}\t#{@loom_tag}";

pub struct TmuxHost {
    session: String,
}

impl TmuxHost {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn is_available() -> bool {
        which::which("tmux").is_ok()
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        trace!(?args, "tmux");
        let output = Command::new("tmux").args(args).output()?;
        if !output.status.success() {
            return Err(Error::Tmux(format!(
                "tmux {} failed: {}",
                args.first().copied().unwrap_or(""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn session_exists(&self) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", &self.session])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn ensure_session(&self) -> Result<()> {
        if self.session_exists() {
            return Ok(());
        }
        debug!(session = %self.session, "Creating tmux session");
        self.run(&["new-session", "-d", "-s", &self.session])?;
        self.run(&["set-option", "-t", &self.session, "base-index", "1"])?;
        let out = self.run(&["display-message", "-p", "-t", &self.session, "#{window_index}"])?;
        if let Some((from, to)) = first_window_move(&self.session, out.trim()) {
            debug!(%from, %to, "Moving first window onto tag 1");
            self.run(&["move-window", "-s", &from, "-t", &to])?;
        }
        Ok(())
    }

    fn windows(&self) -> Result<Vec<(u32, Option<String>)>> {
        if !self.session_exists() {
            return Ok(Vec::new());
        }
        let out = self.run(&["list-windows", "-t", &self.session, "-F", WINDOW_FORMAT])?;
        Ok(out.lines().filter_map(parse_window_line).collect())
    }

    /// tmux target of the window backing `tag`, if one exists.
    fn window_target(&self, tag: &Tag) -> Result<Option<String>> {
        let windows = self.windows()?;
        let index = match tag {
            Tag::Numeric(n) => windows
                .iter()
                .find(|(idx, named)| *idx == u32::from(*n) && named.is_none())
                .map(|(idx, _)| *idx),
            Tag::Named(name) => windows
                .iter()
                .find(|(_, named)| named.as_deref() == Some(name.as_str()))
                .map(|(idx, _)| *idx),
        };
        Ok(index.map(|idx| format!("{}:{}", self.session, idx)))
    }

    fn pane_value(&self, entity: &EntityId, format: &str) -> Result<String> {
        Ok(self
            .run(&["display-message", "-p", "-t", entity.as_str(), format])?
            .trim()
            .to_string())
    }
}

impl Host for TmuxHost {
    fn get_current_tag(&self) -> Result<Tag> {
        self.ensure_session()?;
        let out = self.run(&["display-message", "-p", "-t", &self.session, WINDOW_FORMAT])?;
        let (index, named) = parse_window_line(out.trim())
            .ok_or_else(|| Error::Tmux(format!("Unexpected window format: {}", out.trim())))?;
        Ok(window_tag(index, named))
    }

    fn create_tag(&self, name: &str) -> Result<Tag> {
        let tag = Tag::Named(name.to_string());
        if self.window_target(&tag)?.is_some() {
            return Ok(tag);
        }
        self.ensure_session()?;
        debug!(tag = name, "Creating tag window");
        let target = format!("{}:", self.session);
        let index = self.run(&[
            "new-window",
            "-d",
            "-t",
            &target,
            "-n",
            name,
            "-P",
            "-F",
            "#{window_index}",
        ])?;
        let window = format!("{}:{}", self.session, index.trim());
        self.run(&["set-option", "-w", "-t", &window, TAG_OPTION, name])?;
        Ok(tag)
    }

    fn close_tag(&self, tag: &Tag) -> Result<()> {
        if !tag.is_named() {
            debug!(%tag, "Numeric tags are shared, not closing");
            return Ok(());
        }
        match self.window_target(tag)? {
            Some(target) => {
                debug!(%tag, %target, "Closing tag window");
                self.run(&["kill-window", "-t", &target])?;
            }
            None => debug!(%tag, "Tag window already gone"),
        }
        Ok(())
    }

    fn assign_entity_to_tag(&self, entity: &EntityId, tag: &Tag) -> Result<()> {
        let own_window = self.pane_value(entity, "#{session_name}:#{window_index}")?;
        match self.window_target(tag)? {
            Some(target) if target == own_window => {
                trace!(%entity, %tag, "Entity already on tag");
            }
            Some(target) => {
                debug!(%entity, %tag, %target, "Joining entity into tag window");
                self.run(&["join-pane", "-d", "-s", entity.as_str(), "-t", &target])?;
            }
            None => match tag {
                Tag::Numeric(n) => {
                    let target = format!("{}:{}", self.session, n);
                    debug!(%entity, %tag, "Moving entity window to tag index");
                    self.run(&["move-window", "-s", &own_window, "-t", &target])?;
                }
                Tag::Named(name) => {
                    debug!(%entity, %tag, "Promoting entity window to named tag");
                    self.run(&["rename-window", "-t", &own_window, name])?;
                    self.run(&["set-option", "-w", "-t", &own_window, TAG_OPTION, name])?;
                }
            },
        }
        Ok(())
    }

    fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<HostEntity>> {
        if !self.session_exists() {
            trace!(session = %self.session, "No tmux session, no entities");
            return Ok(Vec::new());
        }
        let out = self.run(&["list-panes", "-s", "-t", &self.session, "-F", PANE_FORMAT])?;
        let entities: Vec<HostEntity> = out
            .lines()
            .filter_map(parse_pane_line)
            .filter(|e| filter.matches(e))
            .collect();
        trace!(count = entities.len(), "list_entities");
        Ok(entities)
    }

    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnToken> {
        if request.argv.is_empty() {
            return Err(Error::Validation("Command cannot be empty".to_string()));
        }
        self.ensure_session()?;

        let cmd_str = request
            .argv
            .iter()
            .map(|s| shell_escape(s))
            .collect::<Vec<_>>()
            .join(" ");
        let target = format!("{}:", self.session);
        let mut args: Vec<String> = ["new-window", "-d", "-P", "-F", "#{pane_id}", "-t"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(target);
        if let Some(dir) = &request.workdir {
            args.push("-c".to_string());
            args.push(dir.display().to_string());
        }
        for (key, value) in &request.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(cmd_str.clone());

        debug!(token = %request.token, cmd = %cmd_str, "Tmux spawn");
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let pane = self.run(&arg_refs)?;
        let pane = EntityId::new(pane.trim());

        if let Err(e) = self.set_entity_property(&pane, SPAWN_PROPERTY, request.token.as_str()) {
            // The program may already have exited and taken its pane with it.
            warn!(%pane, error = %e, "Failed to stamp spawn token");
        }
        Ok(request.token.clone())
    }

    fn set_entity_property(&self, entity: &EntityId, key: &str, value: &str) -> Result<()> {
        let option = format!("@{}", key);
        self.run(&["set-option", "-p", "-t", entity.as_str(), &option, value])?;
        Ok(())
    }

    fn get_entity_property(&self, entity: &EntityId, key: &str) -> Result<Option<String>> {
        let option = format!("@{}", key);
        match self.run(&["show-options", "-p", "-v", "-t", entity.as_str(), &option]) {
            Ok(out) => {
                let value = out.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            Err(_) => Ok(None),
        }
    }

    fn signal_entity(&self, entity: &EntityId, signal: ShutdownSignal) -> Result<()> {
        let pid: i32 = self
            .pane_value(entity, "#{pane_pid}")?
            .parse()
            .map_err(|_| Error::Tmux(format!("No pid for pane {}", entity)))?;
        debug!(%entity, pid, %signal, "Signalling entity");
        // SAFETY: kill(2) on a pid read from tmux; ESRCH means the process is
        // already gone.
        let rc = unsafe { libc::kill(pid, signal.as_libc()) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(Error::Io(err));
            }
        }
        Ok(())
    }

    fn entity_alive(&self, entity: &EntityId) -> Result<bool> {
        match self.pane_value(entity, "#{pane_dead}") {
            Ok(dead) => Ok(dead != "1"),
            Err(_) => Ok(false),
        }
    }

    fn notify(&self, message: &str, level: NotifyLevel) -> Result<()> {
        if !self.session_exists() {
            return Ok(());
        }
        let prefix = match level {
            NotifyLevel::Info => "loom",
            NotifyLevel::Warning => "loom warning",
            NotifyLevel::Error => "loom error",
        };
        let text = format!("{}: {}", prefix, message.replace('#', "##"));
        self.run(&["display-message", "-d", "5000", "-t", &self.session, &text])?;
        Ok(())
    }
}

fn window_tag(index: u32, named: Option<String>) -> Tag {
    match named {
        Some(name) => Tag::Named(name),
        None => match u8::try_from(index) {
            Ok(n) if (crate::tag::TAG_MIN..=crate::tag::TAG_MAX).contains(&n) => Tag::Numeric(n),
            _ => Tag::Named(index.to_string()),
        },
    }
}

/// Source and target for moving a new session's first window to tag 1,
/// when tmux created it below the numeric range.
fn first_window_move(session: &str, index: &str) -> Option<(String, String)> {
    let index: u32 = index.parse().ok()?;
    (index < u32::from(crate::tag::TAG_MIN)).then(|| {
        (
            format!("{}:{}", session, index),
            format!("{}:{}", session, crate::tag::TAG_MIN),
        )
    })
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_window_line(line: &str) -> Option<(u32, Option<String>)> {
    let mut parts = line.splitn(2, '\t');
    let index = parts.next()?.trim().parse().ok()?;
    let named = parts.next().and_then(non_empty);
    Some((index, named))
}

fn parse_pane_line(line: &str) -> Option<HostEntity> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 9 {
        return None;
    }
    let id = fields[0].trim();
    if !id.starts_with('%') {
        return None;
    }
    let tag = fields[2]
        .parse::<u32>()
        .ok()
        .map(|idx| window_tag(idx, non_empty(fields[3])));
    Some(HostEntity {
        id: EntityId::new(id),
        pid: fields[1].parse().ok(),
        tag,
        title: fields[4].to_string(),
        workdir: non_empty(fields[5]).map(PathBuf::from),
        command: fields[6].to_string(),
        owner: non_empty(fields[7]),
        spawn_token: non_empty(fields[8]),
    })
}
