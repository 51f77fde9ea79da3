use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("could not bind {transport} socket on port {port}: {source}")]
    Bind {
        transport: &'static str,
        port: u16,
        source: std::io::Error,
    },

    #[error("could not resolve a usable local address: {0}")]
    AddressResolution(String),
}
