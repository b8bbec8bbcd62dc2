//! TLS dial hook built on rustls.

use std::fmt;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::conn::BoxConnection;
use crate::denylist::split_host_port;
use crate::dial::{DialContext, DialHook, Network};
use crate::error::{Error, Result};

/// Opens a TCP connection through another hook and runs a TLS client
/// handshake on top of it.
///
/// The host part of the dialed address is used as the server name (SNI).
///
/// ```rust,no_run
/// use dialguard::{DialHook, SystemDialer, TlsDialer};
///
/// let tls = TlsDialer::new(SystemDialer::new().into_hook()).into_hook();
/// assert!(matches!(tls, DialHook::Tls(_)));
/// ```
#[derive(Clone)]
pub struct TlsDialer {
    inner: DialHook,
    connector: TlsConnector,
}

impl TlsDialer {
    /// Use webpki roots, no client auth and ALPN `http/1.1`.
    pub fn new(inner: DialHook) -> Self {
        Self::with_config(inner, default_client_config())
    }

    pub fn with_config(inner: DialHook, config: ClientConfig) -> Self {
        Self {
            inner,
            connector: TlsConnector::from(Arc::new(config)),
        }
    }

    /// Dial `addr` through the inner hook and complete the handshake.
    pub async fn dial(&self, network: Network, addr: String) -> Result<BoxConnection> {
        let (host, _port) = split_host_port(&addr)?;
        let host = host.to_string();

        let server_name = ServerName::try_from(host.clone())
            .map_err(|_| Error::tls(&host, "invalid server name"))?;

        let stream = self.inner.dial(DialContext::new(), network, addr).await?;

        let tls_stream = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::tls(&host, e.to_string()))?;

        Ok(Box::new(tls_stream))
    }

    /// Turn this dialer into a TLS-shaped dial hook.
    pub fn into_hook(self) -> DialHook {
        DialHook::tls(move |network: Network, addr: String| {
            let dialer = self.clone();
            async move { dialer.dial(network, addr).await }
        })
    }
}

impl fmt::Debug for TlsDialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsDialer")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

fn default_client_config() -> ClientConfig {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    config
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::conn::testing::MockConnection;

    #[tokio::test]
    async fn test_invalid_server_name_skips_dial() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let inner = DialHook::plain(move |_network, _addr| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                let (conn, _peer) = MockConnection::pair("93.184.216.34:443");
                Ok(Box::new(conn) as BoxConnection)
            }
        });

        let err = TlsDialer::new(inner)
            .dial(Network::Tcp, "bad host!:443".to_string())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Tls { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handshake_failure_is_tls_error() {
        // The peer end is dropped, so the handshake sees EOF.
        let inner = DialHook::plain(|_network, _addr| async {
            let (conn, _peer) = MockConnection::pair("93.184.216.34:443");
            Ok(Box::new(conn) as BoxConnection)
        });

        let err = TlsDialer::new(inner)
            .dial(Network::Tcp, "example.com:443".to_string())
            .await
            .err()
            .unwrap();
        match err {
            Error::Tls { host, .. } => assert_eq!(host, "example.com"),
            other => panic!("expected TLS error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inner_dial_error_passes_through() {
        let inner = DialHook::plain(|_network, _addr| async {
            Err::<BoxConnection, _>(Error::from(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        });

        let err = TlsDialer::new(inner)
            .dial(Network::Tcp, "example.com:443".to_string())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Dial(ref e) if e.kind() == std::io::ErrorKind::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_guarded_inner_refuses_before_handshake() {
        let deny: Arc<crate::DenyList> = Arc::new(["10.0.0.0/8"].into_iter().collect());
        let inner = DialHook::plain(|_network, _addr| async {
            let (conn, _peer) = MockConnection::pair("10.0.0.7:443");
            Ok(Box::new(conn) as BoxConnection)
        })
        .wrap(deny);

        let err = TlsDialer::new(inner)
            .dial(Network::Tcp, "internal.example:443".to_string())
            .await
            .err()
            .unwrap();
        assert!(err.is_denied());
    }

    #[test]
    fn test_into_hook_is_tls_shaped() {
        let inner = DialHook::plain(|_network, _addr| async {
            let (conn, _peer) = MockConnection::pair("93.184.216.34:443");
            Ok(Box::new(conn) as BoxConnection)
        });
        assert!(matches!(TlsDialer::new(inner).into_hook(), DialHook::Tls(_)));
    }
}
