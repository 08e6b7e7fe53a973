use thiserror::Error;

#[derive(Error, Debug)]
pub enum BeamrpcError {
    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Connect timed out after {timeout_ms}ms: {cause}")]
    ConnectTimeout { timeout_ms: u64, cause: String },

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Server sent {received} bytes before the connection was established (maximum {limit})")]
    InitialDataLimit { received: usize, limit: usize },

    #[error("Transport is disposed")]
    Disposed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BeamrpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_timeout_display() {
        let err = BeamrpcError::ConnectTimeout {
            timeout_ms: 250,
            cause: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Connect timed out after 250ms: connection refused"
        );
    }

    #[test]
    fn test_initial_data_limit_display() {
        let err = BeamrpcError::InitialDataLimit {
            received: 20_000,
            limit: 16_384,
        };
        assert!(err.to_string().contains("20000"));
        assert!(err.to_string().contains("16384"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = BeamrpcError::from(io);
        assert!(matches!(err, BeamrpcError::Io(_)));
    }
}
