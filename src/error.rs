use std::io;
use std::path::PathBuf;

use crate::ProfileKind;

pub type Result<T> = std::result::Result<T, ProfileError>;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profiler already started")]
    AlreadyStarted,

    #[error("profiler not started")]
    NotStarted,

    #[error("profiler already stopped")]
    AlreadyStopped,

    #[error("failed to create {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to close {}: {source}", path.display())]
    Close {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {kind} profile: {source}")]
    Write {
        kind: ProfileKind,
        #[source]
        source: io::Error,
    },

    #[cfg(feature = "cpu")]
    #[error("cpu profiler: {0}")]
    Cpu(#[from] pprof::Error),

    #[error("an execution trace is already being written")]
    TraceActive,

    #[error("invalid value {value:?} for {var}")]
    Config { var: &'static str, value: String },
}

impl ProfileError {
    pub(crate) fn write(kind: ProfileKind) -> impl FnOnce(io::Error) -> Self {
        move |source| ProfileError::Write { kind, source }
    }
}
