//! Caption codec.
//!
//! The caption is the only metadata channel into the blob store. Every
//! uploaded message carries `name@path` or `name@path@visibility`; the
//! mirror is rebuilt by parsing it back.
//!
//! Fields are positional. Anything after the third field is ignored, and an
//! unrecognised visibility token decodes as no visibility. Legacy captions
//! use `./`-relative paths (`./`, `./docs`); those decode into the absolute
//! namespace, except for the trash marker which is kept as is.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;
use thiserror::Error;

use crate::path::{ROOT_PATH, TRASH_PATH};

/// Separator between caption fields.
pub const CAPTION_DELIMITER: char = '@';

/// Caption parse errors. Sync counts these as malformed items.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptionError {
    #[error("caption has no '@' delimiter: {0:?}")]
    MissingDelimiter(String),

    #[error("caption has an empty name: {0:?}")]
    EmptyName(String),

    #[error("caption has an empty path: {0:?}")]
    EmptyPath(String),
}

/// Visibility marker carried in the third caption field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum Visibility {
    #[strum(serialize = "visible")]
    Visible,
    #[strum(serialize = "not_visible")]
    NotVisible,
}

impl Visibility {
    /// Parse a caption token (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Visible => "visible",
            Visibility::NotVisible => "not_visible",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded caption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    pub name: String,
    pub path: String,
    pub visibility: Option<Visibility>,
}

impl Caption {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            visibility: None,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Decode `name@path[@visibility]` by positional split.
    pub fn parse(text: &str) -> Result<Self, CaptionError> {
        let mut fields = text.split(CAPTION_DELIMITER);
        let name = fields.next().unwrap_or_default();
        let path = fields
            .next()
            .ok_or_else(|| CaptionError::MissingDelimiter(text.to_string()))?;

        if name.trim().is_empty() {
            return Err(CaptionError::EmptyName(text.to_string()));
        }
        if path.trim().is_empty() {
            return Err(CaptionError::EmptyPath(text.to_string()));
        }
        let visibility = fields
            .next()
            .and_then(|token| Visibility::from_str(token.trim()));

        Ok(Self {
            name: name.to_string(),
            path: absolute_path(path),
            visibility,
        })
    }

    /// Same caption with a new name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Same caption with a new path.
    pub fn relocated(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }
}

/// Map a caption path into the absolute namespace.
///
/// `./` is the root, `./docs` is `/docs`, and a bare relative path hangs off
/// the root. [`TRASH_PATH`] and absolute paths pass through unchanged.
fn absolute_path(path: &str) -> String {
    if path == TRASH_PATH || path.starts_with('/') {
        return path.to_string();
    }
    let rest = path.strip_prefix("./").unwrap_or(path);
    match rest {
        "" | "." => ROOT_PATH.to_string(),
        _ => format!("/{rest}"),
    }
}

impl fmt::Display for Caption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, CAPTION_DELIMITER, self.path)?;
        if let Some(visibility) = self.visibility {
            write!(f, "{}{}", CAPTION_DELIMITER, visibility)?;
        }
        Ok(())
    }
}

impl FromStr for Caption {
    type Err = CaptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Caption::parse(s)
    }
}
