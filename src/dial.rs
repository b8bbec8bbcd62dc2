//! Dial hooks and the deny-list wrapper around them.
//!
//! A transport opens connections through one of three hook shapes:
//!
//! - [`DialHook::Context`]: takes a cancellable [`DialContext`], a
//!   [`Network`] and an address.
//! - [`DialHook::Plain`]: takes only a network and an address.
//! - [`DialHook::Tls`]: same shape as `Plain`, used for TLS-layer dials.
//!
//! [`DialHook::wrap`] puts the same deny-list check behind any of them.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;

use crate::conn::BoxConnection;
use crate::denylist::DenyList;
use crate::error::{Error, Result};

/// Network kind of a dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    /// TCP over IPv4 or IPv6.
    #[default]
    Tcp,
    /// TCP over IPv4 only.
    Tcp4,
    /// TCP over IPv6 only.
    Tcp6,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tcp4 => "tcp4",
            Self::Tcp6 => "tcp6",
        }
    }

    /// Whether a resolved address may be used for this network.
    pub(crate) fn accepts(&self, ip: &IpAddr) -> bool {
        match self {
            Self::Tcp => true,
            Self::Tcp4 => ip.is_ipv4(),
            Self::Tcp6 => ip.is_ipv6(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "tcp4" => Ok(Self::Tcp4),
            "tcp6" => Ok(Self::Tcp6),
            other => Err(Error::Unsupported(format!("network {:?}", other))),
        }
    }
}

/// Cancellation context handed to context-aware dial hooks.
///
/// Clones share the same cancellation state.
#[derive(Debug, Clone)]
pub struct DialContext {
    token: CancellationToken,
}

impl DialContext {
    /// A context that is never cancelled unless [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A context driven by an existing token.
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Default for DialContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Context-aware dial function.
pub type DialContextFn =
    Arc<dyn Fn(DialContext, Network, String) -> BoxFuture<'static, Result<BoxConnection>> + Send + Sync>;

/// Plain (and TLS) dial function.
pub type DialFn = Arc<dyn Fn(Network, String) -> BoxFuture<'static, Result<BoxConnection>> + Send + Sync>;

/// One of the three dial hook shapes a transport may expose.
#[derive(Clone)]
pub enum DialHook {
    Context(DialContextFn),
    Plain(DialFn),
    Tls(DialFn),
}

impl DialHook {
    /// Build a context-aware hook from an async function.
    pub fn context<F, Fut>(f: F) -> Self
    where
        F: Fn(DialContext, Network, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BoxConnection>> + Send + 'static,
    {
        Self::Context(Arc::new(move |ctx: DialContext, network: Network, addr: String| {
            f(ctx, network, addr).boxed()
        }))
    }

    /// Build a plain hook from an async function.
    pub fn plain<F, Fut>(f: F) -> Self
    where
        F: Fn(Network, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BoxConnection>> + Send + 'static,
    {
        Self::Plain(dial_fn(f))
    }

    /// Build a TLS hook from an async function.
    pub fn tls<F, Fut>(f: F) -> Self
    where
        F: Fn(Network, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BoxConnection>> + Send + 'static,
    {
        Self::Tls(dial_fn(f))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Context(_) => "context",
            Self::Plain(_) => "plain",
            Self::Tls(_) => "tls",
        }
    }

    /// Invoke the hook.
    ///
    /// Context-aware hooks receive `ctx` as is. The other shapes take no
    /// context, so their dial is abandoned with an `Interrupted` error if
    /// `ctx` is cancelled first.
    pub async fn dial(&self, ctx: DialContext, network: Network, addr: String) -> Result<BoxConnection> {
        match self {
            Self::Context(dial) => dial(ctx, network, addr).await,
            Self::Plain(dial) | Self::Tls(dial) => {
                let dialing = dial(network, addr);
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => Err(Error::from(cancelled())),
                    res = dialing => res,
                }
            }
        }
    }

    /// Wrap this hook so every connection it opens is checked against `deny`.
    ///
    /// The wrapped hook has the same shape. It forwards its arguments
    /// untouched, returns dial failures as they are, and replaces a
    /// connection whose remote address is denied with
    /// [`Error::DeniedHost`]. The denied connection is dropped, which
    /// closes it.
    pub fn wrap(self, deny: Arc<DenyList>) -> Self {
        match self {
            Self::Context(dial) => Self::Context(Arc::new(
                move |ctx: DialContext, network: Network, addr: String| {
                    let dialing = dial(ctx, network, addr);
                    let deny = Arc::clone(&deny);
                    async move { check(&deny, dialing.await) }.boxed()
                },
            )),
            Self::Plain(dial) => Self::Plain(wrap_dial_fn(dial, deny)),
            Self::Tls(dial) => Self::Tls(wrap_dial_fn(dial, deny)),
        }
    }
}

impl fmt::Debug for DialHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DialHook").field(&self.kind()).finish()
    }
}

pub(crate) fn cancelled() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "dial cancelled")
}

fn dial_fn<F, Fut>(f: F) -> DialFn
where
    F: Fn(Network, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BoxConnection>> + Send + 'static,
{
    Arc::new(move |network: Network, addr: String| f(network, addr).boxed())
}

fn wrap_dial_fn(dial: DialFn, deny: Arc<DenyList>) -> DialFn {
    Arc::new(move |network: Network, addr: String| {
        let dialing = dial(network, addr);
        let deny = Arc::clone(&deny);
        async move { check(&deny, dialing.await) }.boxed()
    })
}

/// Accept or reject the outcome of an underlying dial.
fn check(deny: &DenyList, dialed: Result<BoxConnection>) -> Result<BoxConnection> {
    // No connection, nothing to inspect.
    let conn = dialed?;

    let addr = conn.remote_addr().map_err(Error::RemoteAddr)?;

    if deny.is_denied(&addr)? {
        tracing::debug!(%addr, "refusing connection to denied address");
        drop(conn);
        return Err(Error::denied_host(addr));
    }

    tracing::trace!(%addr, "connection passed deny list");
    Ok(conn)
}
