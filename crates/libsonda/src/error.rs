#[derive(Debug, thiserror::Error)]
pub enum SondaError {
  #[error("invalid configuration: {0}")]
  ConfigError(String),
  #[error("malformed instrument id: {0}")]
  InvalidId(String),
  #[error("no provider registered for prefix: {0}")]
  UnknownProvider(String),
  #[error("no attribute handler registered for prefix: {0}")]
  UnknownHandler(String),
  #[error(transparent)]
  OtherError(#[from] anyhow::Error),
}
