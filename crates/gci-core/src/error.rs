use thiserror::Error;

#[derive(Debug, Error)]
pub enum GciError {
    #[error("invalid interceptor configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to parse interceptor configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T, E = GciError> = std::result::Result<T, E>;
