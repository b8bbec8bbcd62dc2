//! Guarded transport assembly.
//!
//! A [`BaseTransport`] describes how connections would be opened without any
//! guard: up to three optional dial hooks. [`Transport::new`] turns it into a
//! [`Transport`] whose hooks check every connection against a [`DenyList`].
//!
//! ## Hook selection
//!
//! 1. A context-aware hook, if present, is the primary hook.
//! 2. Otherwise the plain hook, if present.
//! 3. Otherwise a [`SystemDialer`] is installed as the context-aware hook.
//!
//! Only the primary hook is wrapped and used; a plain hook shadowed by a
//! context-aware one is never called. A TLS hook is wrapped independently
//! whenever it is present.
//!
//! ## Immutability
//!
//! A [`Transport`] never changes after construction. Clones share the same
//! hooks and deny list.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::conn::BoxConnection;
use crate::denylist::DenyList;
use crate::dial::{DialContext, DialContextFn, DialFn, DialHook, Network};
use crate::dialer::SystemDialer;
use crate::error::{Error, Result};

#[cfg(feature = "tls")]
use crate::tls::TlsDialer;

/// The dial hooks of an unguarded transport. Any of them may be absent.
#[derive(Clone, Default)]
pub struct BaseTransport {
    pub dial_context: Option<DialContextFn>,
    pub dial: Option<DialFn>,
    pub dial_tls: Option<DialFn>,
}

impl BaseTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `hook` into the slot matching its shape, replacing what was there.
    pub fn with_hook(mut self, hook: DialHook) -> Self {
        match hook {
            DialHook::Context(dial) => self.dial_context = Some(dial),
            DialHook::Plain(dial) => self.dial = Some(dial),
            DialHook::Tls(dial) => self.dial_tls = Some(dial),
        }
        self
    }
}

impl fmt::Debug for BaseTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseTransport")
            .field("dial_context", &self.dial_context.is_some())
            .field("dial", &self.dial.is_some())
            .field("dial_tls", &self.dial_tls.is_some())
            .finish()
    }
}

/// A transport whose dial hooks refuse denied destinations.
///
/// # Example
///
/// ```rust,no_run
/// use dialguard::{Network, Transport};
///
/// # async fn example() -> Result<(), dialguard::Error> {
/// let transport = Transport::builder()
///     .deny_host("10.0.0.0/8")
///     .deny_host("169.254.169.254")
///     .build();
///
/// match transport.dial(Network::Tcp, "example.com:80").await {
///     Ok(conn) => println!("connected to {}", conn.remote_addr()?),
///     Err(e) if e.is_denied() => println!("refused: {}", e),
///     Err(e) => return Err(e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Transport {
    primary: DialHook,
    tls: Option<DialHook>,
    deny: Arc<DenyList>,
}

impl Transport {
    /// Guard `base` with a deny list given as raw entry strings.
    ///
    /// Entries that are neither an IP address nor a CIDR range are ignored.
    pub fn new<I, S>(base: BaseTransport, deny_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_deny_list(base, deny_hosts.into_iter().collect())
    }

    /// Guard `base` with an already-built deny list.
    pub fn with_deny_list(base: BaseTransport, deny: DenyList) -> Self {
        Self::assemble(base, Arc::new(deny), SystemDialer::default(), false)
    }

    pub fn builder() -> TransportBuilder {
        TransportBuilder::default()
    }

    fn assemble(base: BaseTransport, deny: Arc<DenyList>, system: SystemDialer, default_tls: bool) -> Self {
        let primary = match (base.dial_context, base.dial) {
            (Some(dial), _) => DialHook::Context(dial),
            (None, Some(dial)) => DialHook::Plain(dial),
            (None, None) => system.into_hook(),
        }
        .wrap(Arc::clone(&deny));

        let tls = match base.dial_tls {
            Some(dial) => Some(DialHook::Tls(dial).wrap(Arc::clone(&deny))),
            None => default_tls_hook(&primary, &deny, default_tls),
        };

        tracing::debug!(
            primary = primary.kind(),
            tls = tls.is_some(),
            entries = deny.len(),
            "assembled guarded transport"
        );

        Self { primary, tls, deny }
    }

    pub fn deny_list(&self) -> &DenyList {
        &self.deny
    }

    /// The wrapped primary hook (context-aware or plain).
    pub fn primary_hook(&self) -> &DialHook {
        &self.primary
    }

    /// The wrapped TLS hook, if the transport has one.
    pub fn tls_hook(&self) -> Option<&DialHook> {
        self.tls.as_ref()
    }

    pub fn has_tls_hook(&self) -> bool {
        self.tls.is_some()
    }

    /// Open a connection through the primary hook.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeniedHost`] if the connection's remote address is
    /// denied; any failure of the underlying dial is returned unchanged.
    pub async fn dial_context(
        &self,
        ctx: DialContext,
        network: Network,
        addr: impl Into<String>,
    ) -> Result<BoxConnection> {
        self.primary.dial(ctx, network, addr.into()).await
    }

    /// [`dial_context`](Self::dial_context) with a context that is never cancelled.
    pub async fn dial(&self, network: Network, addr: impl Into<String>) -> Result<BoxConnection> {
        self.dial_context(DialContext::new(), network, addr).await
    }

    /// Open a TLS connection through the TLS hook.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] if the transport has no TLS hook.
    pub async fn dial_tls(&self, network: Network, addr: impl Into<String>) -> Result<BoxConnection> {
        let tls = self
            .tls
            .as_ref()
            .ok_or_else(|| Error::Unsupported("transport has no TLS dial hook".to_string()))?;

        tls.dial(DialContext::new(), network, addr.into()).await
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("primary", &self.primary)
            .field("tls", &self.tls)
            .field("deny", &self.deny)
            .finish()
    }
}

#[cfg(feature = "tls")]
fn default_tls_hook(primary: &DialHook, deny: &Arc<DenyList>, enabled: bool) -> Option<DialHook> {
    // Layered on the guarded primary hook so a denied peer never sees a ClientHello.
    enabled.then(|| TlsDialer::new(primary.clone()).into_hook().wrap(Arc::clone(deny)))
}

#[cfg(not(feature = "tls"))]
fn default_tls_hook(_primary: &DialHook, _deny: &Arc<DenyList>, _enabled: bool) -> Option<DialHook> {
    None
}

/// Builder for [`Transport`].
///
/// Each method consumes the builder; [`build`](Self::build) produces an
/// immutable transport.
#[derive(Debug, Clone, Default)]
pub struct TransportBuilder {
    base: BaseTransport,
    deny: DenyList,
    system: SystemDialer,
    default_tls: bool,
}

impl TransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing base transport.
    pub fn base(mut self, base: BaseTransport) -> Self {
        self.base = base;
        self
    }

    /// Install a hook into the slot matching its shape.
    pub fn hook(mut self, hook: DialHook) -> Self {
        self.base = self.base.with_hook(hook);
        self
    }

    /// Install a context-aware dial hook.
    pub fn dial_context<F, Fut>(self, f: F) -> Self
    where
        F: Fn(DialContext, Network, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BoxConnection>> + Send + 'static,
    {
        self.hook(DialHook::context(f))
    }

    /// Install a plain dial hook.
    pub fn dial<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Network, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BoxConnection>> + Send + 'static,
    {
        self.hook(DialHook::plain(f))
    }

    /// Install a TLS dial hook.
    pub fn dial_tls<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Network, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BoxConnection>> + Send + 'static,
    {
        self.hook(DialHook::tls(f))
    }

    /// Deny an IP address or CIDR range. Invalid entries are ignored.
    pub fn deny_host(mut self, entry: &str) -> Self {
        self.deny = self.deny.with_entry(entry);
        self
    }

    /// Deny several entries at once.
    pub fn deny_hosts<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for entry in entries {
            self.deny = self.deny.with_entry(entry.as_ref());
        }
        self
    }

    /// Add every entry of an existing deny list.
    pub fn deny_list(mut self, deny: DenyList) -> Self {
        self.deny.extend(deny.iter().copied());
        self
    }

    /// Dialer used when the base transport has no primary hook.
    pub fn system_dialer(mut self, dialer: SystemDialer) -> Self {
        self.system = dialer;
        self
    }

    /// Provide a rustls TLS hook on top of the guarded primary hook when the
    /// base transport has none.
    #[cfg(feature = "tls")]
    pub fn default_tls(mut self, enabled: bool) -> Self {
        self.default_tls = enabled;
        self
    }

    pub fn build(self) -> Transport {
        Transport::assemble(self.base, Arc::new(self.deny), self.system, self.default_tls)
    }
}
