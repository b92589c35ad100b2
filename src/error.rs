use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the user with a non-zero exit.
///
/// "No matching profile" is deliberately not here: leaving the current
/// configuration untouched is the normal outcome, not a failure.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("profile '{0}' does not exist")]
    ProfileNotFound(String),

    #[error("'{0}' is a reserved virtual profile name")]
    ReservedName(String),

    #[error("profile '{0}' is defined in a system directory and cannot be removed")]
    SystemProfile(String),

    #[error("invalid profile name '{0}'")]
    InvalidName(String),

    #[error("no writable profile directory is configured")]
    NoSaveRoot,

    #[error("no mode is supported by every connected output")]
    NoCommonMode,

    #[error("no outputs are connected")]
    NoConnectedOutputs,

    #[error("failed to parse {path}: {reason}")]
    ProfileParse { path: PathBuf, reason: String },

    #[error("xrandr invocation failed: {0}")]
    Apply(String),

    #[error("failed to parse xrandr output: {0}")]
    XrandrParse(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
