use std::path::PathBuf;

/// What went wrong while running a provider script job.
#[derive(Debug)]
pub enum ScriptError {
    /// The script file could not be read.
    ScriptUnreadable { path: PathBuf, why: std::io::Error },
    /// The script does not parse.
    Syntax { message: String },
    /// The provider manifest asks for an extension outside the allow-list.
    DisallowedExtension { extension: String },
    /// An include() call violated the include rules or named a missing file.
    Include { message: String },
    /// Evaluating the script's global statements raised an error.
    Evaluation { message: String },
    /// The entry function for the requested parse mode is not defined.
    EntryMissing { function: String },
    /// The entry function (or a network callback) raised an error.
    Runtime { message: String },
    /// The job was aborted from outside.
    Aborted,
}

/// Coarse classification matching the engine's error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    Load,
    EntryMissing,
    Runtime,
    /// The job completed but produced no usable records.
    ParseFailed,
    Aborted,
}

impl ScriptError {
    pub fn kind(&self) -> ScriptErrorKind {
        match self {
            ScriptError::ScriptUnreadable { .. }
            | ScriptError::Syntax { .. }
            | ScriptError::DisallowedExtension { .. }
            | ScriptError::Include { .. }
            | ScriptError::Evaluation { .. } => ScriptErrorKind::Load,
            ScriptError::EntryMissing { .. } => ScriptErrorKind::EntryMissing,
            ScriptError::Runtime { .. } => ScriptErrorKind::Runtime,
            ScriptError::Aborted => ScriptErrorKind::Aborted,
        }
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::ScriptUnreadable { path, why } => {
                write!(f, "cannot read script {}: {}", path.display(), why)
            }
            ScriptError::Syntax { message } => write!(f, "error in the script: {}", message),
            ScriptError::DisallowedExtension { extension } => {
                write!(f, "extension '{}' is not allowed", extension)
            }
            ScriptError::Include { message } => write!(f, "{}", message),
            ScriptError::Evaluation { message } => {
                write!(f, "error in the script: {}", message)
            }
            ScriptError::EntryMissing { function } => {
                write!(f, "the script has no '{}' function", function)
            }
            ScriptError::Runtime { message } => write!(f, "{}", message),
            ScriptError::Aborted => write!(f, "the job was aborted"),
        }
    }
}

impl std::error::Error for ScriptError {}
