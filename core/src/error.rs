use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("couldn't open the configuration file {path}: {source}")]
    ConfigOpen {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unable to resolve {address}:{port}")]
    AddressResolution { address: String, port: u16 },

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("cannot open the squelch file {path}: {source}")]
    SquelchFile {
        path: String,
        source: std::io::Error,
    },

    #[error("resampler error: {0}")]
    Resampler(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
