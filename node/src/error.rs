use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid nickname {0:?}: expected 4-16 ASCII alphanumeric characters")]
    InvalidNickname(String),

    #[error("could not read config file {path}: {reason}")]
    Config { path: String, reason: String },

    #[error(transparent)]
    Fs(#[from] shoal_fs::FsError),

    #[error(transparent)]
    Network(#[from] shoal_network::NetworkError),
}
