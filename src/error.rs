use camino::Utf8PathBuf;
use thiserror::Error;

use crate::diagnostics::ScopedDiagnostic;

#[derive(Debug, Error)]
pub enum SwbuildError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),

    #[error("Error while constructing the build description:\n{0}")]
    Description(#[from] DescriptionError),

    #[error("Error while (de)serializing the build description:\n{0}")]
    Serial(#[from] SerialError),

    #[error("Error in the build description cache:\n{0}")]
    Cache(#[from] CacheError),

    #[error("Invalid configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plist(#[from] PlistError),
}

/// Fatal problems found while assembling a build description.
#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("{}", render_scoped(.0))]
    MalformedTasks(Vec<ScopedDiagnostic>),

    #[error("Couldn't render the build manifest.\n{0}")]
    Manifest(#[from] serde_json::Error),
}

fn render_scoped(items: &[ScopedDiagnostic]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("Not a serialized build description (bad magic)")]
    BadMagic,

    #[error("Unsupported build description format version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("Couldn't encode the build description.\n{0}")]
    Encode(String),

    #[error("Couldn't decode the build description.\n{0}")]
    Decode(String),
}

impl<E: std::fmt::Debug> From<ciborium::ser::Error<E>> for SerialError {
    fn from(e: ciborium::ser::Error<E>) -> Self {
        SerialError::Encode(format!("{e:?}"))
    }
}

impl<E: std::fmt::Debug> From<ciborium::de::Error<E>> for SerialError {
    fn from(e: ciborium::de::Error<E>) -> Self {
        SerialError::Decode(format!("{e:?}"))
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Couldn't access cached description at {0}:\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error(transparent)]
    Description(#[from] DescriptionError),

    #[error("Description construction failed:\n{0}")]
    Construction(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("Couldn't read config file {0}:\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file.\n{0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PlistError {
    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Write(String),

    #[error("tried to merge {new} value for key '{key}' onto {old} value")]
    MergeTypeMismatch {
        key: String,
        new: &'static str,
        old: &'static str,
    },

    #[error("{kind} value cannot be represented in the OpenStep format")]
    Unrepresentable { kind: &'static str },
}

impl From<plist::Error> for PlistError {
    fn from(e: plist::Error) -> Self {
        PlistError::Parse(e.to_string())
    }
}
