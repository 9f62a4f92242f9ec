// SHARDBENCH ERROR TAXONOMY
// LIBRARY ERRORS ARE TYPED. THE BINARY WRAPS THEM IN anyhow WITH CONTEXT.
//
// NOT EVERYTHING IS AN ERROR HERE: A LOAD RUN THAT NEVER PRINTED ITS FINAL
// REPORT IS A Measurement::NoReport VALUE, AND KILLING AN ALREADY-DEAD PROCESS
// GROUP IS SWALLOWED INSIDE THE SUPERVISOR.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("control command `{command}` failed ({status}): {stderr}")]
    ControlCommand {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("invalid topology: {0}")]
    Topology(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("interrupted")]
    Interrupted,

    #[error("background task `{0}` panicked")]
    TaskPanicked(&'static str),

    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record at line {line}: {source}")]
    Record {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl BenchError {
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = BenchError> = std::result::Result<T, E>;
