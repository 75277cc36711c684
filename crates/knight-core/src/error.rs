use thiserror::Error;

/// Top-level error type for Knight.
#[derive(Debug, Error)]
pub enum KnightError {
    /// Error from an AI provider.
    #[error("provider error: {0}")]
    Provider(String),

    /// Error from a messaging channel.
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Shadow store error.
    #[error("shadow store error: {0}")]
    Shadow(String),

    /// An operation ran past its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = KnightError::from(io_err);
        let display = format!("{err}");
        assert!(
            display.contains("io error"),
            "expected 'io error' in display, got: {display}"
        );
        assert!(display.contains("file missing"));
    }

    #[test]
    fn test_channel_error_display() {
        let err = KnightError::Channel("test".into());
        assert_eq!(format!("{err}"), "channel error: test");
    }

    #[test]
    fn test_timeout_error_display() {
        let err = KnightError::Timeout("media download after 20s".into());
        assert_eq!(format!("{err}"), "timed out: media download after 20s");
    }
}
