//! Error types for Podium Core.

use podium_training::TrainingError;
use thiserror::Error;

/// Core error type for Podium operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dataset, training or registry errors from the pipeline primitives
    #[error(transparent)]
    Training(#[from] TrainingError),

    /// Inference host errors
    #[error(transparent)]
    Serve(#[from] crate::serve::ServeError),

    /// Address parsing errors
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Podium Core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_training_conversion() {
        let err: CoreError = TrainingError::Trainer("exit status 1".to_string()).into();
        match err {
            CoreError::Training(TrainingError::Trainer(msg)) => assert_eq!(msg, "exit status 1"),
            _ => panic!("Expected Training error variant"),
        }
    }

    #[test]
    fn test_core_error_address_parsing() {
        let parse_err = "invalid:address:format".parse::<std::net::SocketAddr>().unwrap_err();
        let err: CoreError = parse_err.into();
        assert!(matches!(err, CoreError::InvalidAddress(_)));
    }

    #[test]
    fn test_core_error_config_display() {
        let err = CoreError::Config("missing api key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing api key");
    }
}
