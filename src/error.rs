//! Error types for dialguard.

use std::io;

use thiserror::Error;

/// Errors that can occur while dialing through a guarded transport.
#[derive(Debug, Error)]
pub enum Error {
    /// The resolved connection matched an entry of the deny list.
    #[error("address matches a denied host: {addr}")]
    DeniedHost { addr: String },

    /// A remote address could not be split into host and port.
    #[error("invalid address {addr:?}: {reason}")]
    AddressFormat { addr: String, reason: String },

    /// A dialed connection could not report its remote address.
    #[error("remote address unavailable: {0}")]
    RemoteAddr(#[source] io::Error),

    /// Name resolution failed in the system dialer.
    #[error("DNS error for {host}: {message}")]
    Dns { host: String, message: String },

    /// The underlying dial failed. Carried as-is.
    #[error(transparent)]
    Dial(#[from] io::Error),

    /// The TLS layer could not be established.
    #[cfg(feature = "tls")]
    #[error("TLS error for {host}: {message}")]
    Tls { host: String, message: String },

    /// The transport has no hook for the requested operation.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result type alias for dialguard.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn denied_host(addr: impl Into<String>) -> Self {
        Self::DeniedHost { addr: addr.into() }
    }

    pub(crate) fn address_format(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AddressFormat {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn dns(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dns {
            host: host.into(),
            message: message.into(),
        }
    }

    #[cfg(feature = "tls")]
    pub(crate) fn tls(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tls {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a deny-list rejection rather than a network failure.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::DeniedHost { .. })
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Dial(inner) => inner,
            Error::DeniedHost { .. } => io::Error::new(io::ErrorKind::PermissionDenied, err),
            Error::AddressFormat { .. } => io::Error::new(io::ErrorKind::InvalidInput, err),
            Error::RemoteAddr(ref source) => {
                let kind = source.kind();
                io::Error::new(kind, err)
            }
            Error::Dns { .. } => io::Error::new(io::ErrorKind::NotFound, err),
            Error::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
            #[cfg(feature = "tls")]
            Error::Tls { .. } => io::Error::other(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_message() {
        let err = Error::denied_host("10.1.2.3:443");
        assert!(err.is_denied());
        assert_eq!(
            err.to_string(),
            "address matches a denied host: 10.1.2.3:443"
        );
    }

    #[test]
    fn test_dial_error_is_transparent() {
        let err = Error::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(!err.is_denied());
        assert_eq!(err.to_string(), "refused");
    }

    #[test]
    fn test_into_io_error_keeps_dial_kind() {
        let err = Error::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(io_err.to_string(), "refused");
    }

    #[test]
    fn test_into_io_error_denied_is_permission_denied() {
        let io_err: io::Error = Error::denied_host("127.0.0.1:80").into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);

        // The typed error survives inside the io::Error.
        let inner = io_err
            .get_ref()
            .and_then(|e| e.downcast_ref::<Error>())
            .expect("inner dialguard error");
        assert!(inner.is_denied());
    }

    #[test]
    fn test_into_io_error_address_format() {
        let io_err: io::Error = Error::address_format("nope", "missing port in address").into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_remote_addr_error() {
        let err = Error::RemoteAddr(io::Error::new(io::ErrorKind::NotConnected, "not connected"));
        assert!(!err.is_denied());
        assert_eq!(err.to_string(), "remote address unavailable: not connected");

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::NotConnected);
    }
}
