//! Script resolution
//!
//! The script is read once at start from exactly one source and never
//! reloaded.

use std::fmt;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::config::ScriptSettings;
use crate::error::ConfigError;

/// Where a script was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOrigin {
    Inline,
    File(PathBuf),
}

impl fmt::Display for ScriptOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptOrigin::Inline => write!(f, "<inline>"),
            ScriptOrigin::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Immutable script text plus its SHA-256 fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    text: String,
    origin: ScriptOrigin,
    fingerprint: String,
}

impl Script {
    pub fn inline(text: impl Into<String>) -> Self {
        Self::new(text.into(), ScriptOrigin::Inline)
    }

    fn new(text: String, origin: ScriptOrigin) -> Self {
        let fingerprint = format!("{:x}", Sha256::digest(text.as_bytes()));
        Self {
            text,
            origin,
            fingerprint,
        }
    }

    /// Resolve from settings, requiring exactly one of body or file
    ///
    /// A blank body or an empty path counts as unset.
    pub fn resolve(settings: &ScriptSettings) -> Result<Self, ConfigError> {
        let body = settings
            .script_body
            .as_ref()
            .filter(|body| !body.trim().is_empty());
        let file = settings
            .script_file
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty());

        match (body, file) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingScript),
            (None, None) => Err(ConfigError::NoScript),
            (Some(body), None) => Ok(Self::inline(body.clone())),
            (None, Some(path)) => {
                let text = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::ScriptFile {
                        path: path.clone(),
                        source,
                    }
                })?;
                Ok(Self::new(text, ScriptOrigin::File(path.clone())))
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn origin(&self) -> &ScriptOrigin {
        &self.origin
    }

    /// Hex SHA-256 of the text
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// First 12 hex digits, for log lines
    pub fn short_fingerprint(&self) -> &str {
        &self.fingerprint[..12]
    }
}
