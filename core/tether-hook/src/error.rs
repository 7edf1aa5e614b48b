use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Failed to read stdin: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to spawn lock holder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Core(#[from] tether_core::TetherError),
}

pub type Result<T> = std::result::Result<T, HookError>;
