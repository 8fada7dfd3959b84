//! Error types for the CLI

use std::path::PathBuf;

use apploy_model::{ScriptError, SessionError, SessionState};

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read script {}: {source}", path.display())]
    ReadScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("script did not start an app")]
    NoApp,

    #[error("app is not closed (session is {state}); end the script with 'close'")]
    Unfinished { state: SessionState },

    #[error("output directory {} does not exist", path.display())]
    MissingOutDir { path: PathBuf },
}
