//! Tag resolution.
//!
//! Maps a resource's declared [`Placement`] plus the base tag the project was
//! started from into a concrete [`Tag`]. Resolution is a pure function: the
//! base tag is always passed in, never read from the host.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lowest numeric tag.
pub const TAG_MIN: u8 = 1;
/// Highest numeric tag; numeric placements beyond it clamp here.
pub const TAG_MAX: u8 = 9;

/// A host tag: numeric `1..=9` or named.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tag {
    Numeric(u8),
    Named(String),
}

impl Tag {
    pub fn is_named(&self) -> bool {
        matches!(self, Tag::Named(_))
    }

    pub fn as_numeric(&self) -> Option<u8> {
        match self {
            Tag::Numeric(n) => Some(*n),
            Tag::Named(_) => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Numeric(n) => write!(f, "{}", n),
            Tag::Named(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for Tag {
    type Err = Error;

    /// Parses host output: digits in range are numeric, anything else is a
    /// name.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Validation("Tag cannot be empty".to_string()));
        }
        match s.parse::<u8>() {
            Ok(n) if (TAG_MIN..=TAG_MAX).contains(&n) => Ok(Tag::Numeric(n)),
            _ => Ok(Tag::Named(s.to_string())),
        }
    }
}

/// Declared placement of a resource, as written in a project file.
///
/// Project files use `{ relative = 1 }`, `{ absolute = "3" }` or
/// `{ tag = "notes" }`. An all-digit `absolute` value is a numeric tag, any
/// other value is a named tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PlacementDecl {
    Relative(i32),
    Absolute(String),
    Tag(String),
}

/// Validated placement of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PlacementDecl", into = "PlacementDecl")]
pub enum Placement {
    /// Offset from the base tag.
    Relative(i32),
    /// A numeric tag; values above the ceiling clamp on resolution.
    AbsoluteNumeric(u32),
    /// A named tag, never clamped.
    AbsoluteNamed(String),
}

impl Default for Placement {
    fn default() -> Self {
        Placement::Relative(0)
    }
}

impl TryFrom<PlacementDecl> for Placement {
    type Error = String;

    fn try_from(decl: PlacementDecl) -> std::result::Result<Self, Self::Error> {
        match decl {
            PlacementDecl::Relative(offset) => Ok(Placement::Relative(offset)),
            PlacementDecl::Absolute(value) => parse_absolute(&value),
            PlacementDecl::Tag(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err("named tag cannot be empty".to_string());
                }
                Ok(Placement::AbsoluteNamed(name.to_string()))
            }
        }
    }
}

impl From<Placement> for PlacementDecl {
    fn from(placement: Placement) -> Self {
        match placement {
            Placement::Relative(offset) => PlacementDecl::Relative(offset),
            Placement::AbsoluteNumeric(n) => PlacementDecl::Absolute(n.to_string()),
            Placement::AbsoluteNamed(name) => PlacementDecl::Tag(name),
        }
    }
}

fn parse_absolute(value: &str) -> std::result::Result<Placement, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("absolute tag cannot be empty".to_string());
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        // Digits only, so a parse error can only be overflow.
        let n: u32 = value.parse().unwrap_or(u32::MAX);
        if n < u32::from(TAG_MIN) {
            return Err(format!("absolute tag must be at least {}", TAG_MIN));
        }
        return Ok(Placement::AbsoluteNumeric(n));
    }
    Ok(Placement::AbsoluteNamed(value.to_string()))
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Relative(k) => write!(f, "relative {:+}", k),
            Placement::AbsoluteNumeric(n) => write!(f, "absolute {}", n),
            Placement::AbsoluteNamed(name) => write!(f, "tag '{}'", name),
        }
    }
}

/// Output of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPlacement {
    pub tag: Tag,
    /// Set when the requested numeric tag fell outside `1..=9` and was
    /// clamped.
    pub overflowed: bool,
    /// The numeric tag asked for before clamping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<i64>,
}

/// Resolve a placement against the project's base tag.
///
/// Numeric results are clamped into `1..=9`, never wrapped.
pub fn resolve(placement: &Placement, base_tag: u8) -> ResolvedPlacement {
    match placement {
        Placement::Relative(offset) => clamp(i64::from(base_tag) + i64::from(*offset)),
        Placement::AbsoluteNumeric(n) => clamp(i64::from(*n)),
        Placement::AbsoluteNamed(name) => ResolvedPlacement {
            tag: Tag::Named(name.clone()),
            overflowed: false,
            requested: None,
        },
    }
}

fn clamp(target: i64) -> ResolvedPlacement {
    let min = i64::from(TAG_MIN);
    let max = i64::from(TAG_MAX);
    let (tag, overflowed) = if target > max {
        (TAG_MAX, true)
    } else if target < min {
        (TAG_MIN, true)
    } else {
        (target as u8, false)
    };
    ResolvedPlacement {
        tag: Tag::Numeric(tag),
        overflowed,
        requested: Some(target),
    }
}
