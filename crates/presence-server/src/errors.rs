//! Server-side error types.

/// Failures of the server lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be opened. Fatal at startup.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The bound socket did not report its local address.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
    /// `listen` was called after `graceful_shutdown`.
    #[error("server has been shut down")]
    ShutDown,
}

/// A pending registry operation that did not produce a timestamp.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Cancelled by `clear` or `cancel_pending` before its delay elapsed.
    #[error("registry operation cancelled")]
    Cancelled,
    /// The scheduled task was aborted or panicked.
    #[error("registry operation aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_mentions_address() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:80".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let text = err.to_string();
        assert!(text.contains("0.0.0.0:80"));
        assert!(text.contains("denied"));
    }

    #[test]
    fn registry_error_display() {
        assert_eq!(RegistryError::Cancelled.to_string(), "registry operation cancelled");
    }
}
