//! Default system dialer.
//!
//! Installed as the context-aware hook when a base transport brings no dial
//! hook of its own.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::TokioResolver;
use tokio::net::TcpStream;
use tokio::sync::OnceCell;

use crate::conn::BoxConnection;
use crate::denylist::split_host_port;
use crate::dial::{cancelled, DialContext, DialHook, Network};
use crate::error::{Error, Result};

/// Connect timeout used by [`SystemDialer::default`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves a host and opens a TCP connection to the first address that answers.
///
/// The resolver is built from the system configuration on first use and
/// shared by every clone of the dialer.
#[derive(Clone)]
pub struct SystemDialer {
    /// Limit for each individual connect attempt. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,

    /// Set `TCP_NODELAY` on established connections.
    pub nodelay: bool,

    resolver: Arc<OnceCell<TokioResolver>>,
}

impl Default for SystemDialer {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            nodelay: true,
            resolver: Arc::new(OnceCell::new()),
        }
    }
}

impl fmt::Debug for SystemDialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemDialer")
            .field("connect_timeout", &self.connect_timeout)
            .field("nodelay", &self.nodelay)
            .field("resolver_ready", &self.resolver.initialized())
            .finish()
    }
}

impl SystemDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Dial `addr` (`host:port`) over `network`.
    ///
    /// Every resolved address allowed by `network` is tried in order; the
    /// error of the last attempt is returned if none succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::AddressFormat`] if `addr` is not `host:port` or the port is invalid
    /// - [`Error::Dns`] if the host cannot be resolved
    /// - [`Error::Dial`] for connect failures, timeouts (`TimedOut`) and
    ///   cancellation (`Interrupted`)
    pub async fn dial(&self, ctx: &DialContext, network: Network, addr: &str) -> Result<BoxConnection> {
        let (host, port) = split_host_port(addr)?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::address_format(addr, format!("invalid port {:?}", port)))?;

        let ips = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(Error::from(cancelled())),
            ips = self.resolve(host) => ips?,
        };

        let targets: Vec<SocketAddr> = ips
            .into_iter()
            .filter(|ip| network.accepts(ip))
            .map(|ip| SocketAddr::new(ip, port))
            .collect();

        if targets.is_empty() {
            return Err(Error::from(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no {} address found for {}", network, host),
            )));
        }

        self.connect_any(ctx, targets).await
    }

    /// Try `targets` in order until one connects. Stops early only when `ctx`
    /// is cancelled.
    async fn connect_any(&self, ctx: &DialContext, targets: Vec<SocketAddr>) -> Result<BoxConnection> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no address to connect to");

        for target in targets {
            match self.connect(ctx, target).await {
                Ok(stream) => return Ok(Box::new(stream)),
                Err(e) if ctx.is_cancelled() => return Err(e.into()),
                Err(e) => {
                    tracing::debug!(%target, error = %e, "connect attempt failed");
                    last_err = e;
                }
            }
        }

        Err(last_err.into())
    }

    async fn connect(&self, ctx: &DialContext, target: SocketAddr) -> io::Result<TcpStream> {
        let connecting = async {
            match self.connect_timeout {
                Some(limit) => tokio::time::timeout(limit, TcpStream::connect(target))
                    .await
                    .map_err(|_| {
                        io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("connect to {} timed out", target),
                        )
                    })?,
                None => TcpStream::connect(target).await,
            }
        };

        let stream = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(cancelled()),
            res = connecting => res?,
        };

        stream.set_nodelay(self.nodelay)?;
        Ok(stream)
    }

    /// Resolve a host to its IP addresses. IP literals skip DNS.
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let resolver = self
            .resolver
            .get_or_try_init(|| async {
                TokioResolver::builder_tokio()
                    .map(|builder| builder.build())
                    .map_err(|e| Error::dns(host, e.to_string()))
            })
            .await?;

        let response = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| Error::dns(host, e.to_string()))?;

        Ok(response.iter().collect())
    }

    /// Turn this dialer into a context-aware dial hook.
    pub fn into_hook(self) -> DialHook {
        DialHook::context(move |ctx: DialContext, network: Network, addr: String| {
            let dialer = self.clone();
            async move { dialer.dial(&ctx, network, &addr).await }
        })
    }
}
