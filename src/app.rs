//! Application: registration surface, the frozen dispatcher, and the
//! default error hook.
//!
//! An [`App`] is mutable only at startup: register middleware, tweak
//! settings, seed the templates. Activation ([`App::callback`] or
//! [`App::listen`]) freezes everything into an `Arc` shared read-only by
//! every concurrent request; there is no post-activation mutation surface,
//! so no locking either. That is the whole concurrency story for
//! application state.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use http::StatusCode;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::middleware::{BoxFuture, Converted, FnMiddleware, Middleware, Next, Phased};
use crate::respond::{fail, respond};
use crate::response::RawBody;
use crate::server::Server;

/// Overridable sink for errors surfacing from the chain or the transport.
pub(crate) type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync + 'static>;

/// The three default-bundles layered under every request.
pub(crate) struct Templates {
    /// Defaults visible through every context's state bag.
    pub(crate) context: HashMap<String, Value>,
    /// Fallback request headers consulted when the wire lacks a header.
    pub(crate) request: HeaderMap,
    /// Default headers inherited by every response facade.
    pub(crate) response: HeaderMap,
}

/// The frozen application shared by every request.
pub(crate) struct AppInner {
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) env: String,
    pub(crate) proxy: bool,
    pub(crate) subdomain_offset: usize,
    pub(crate) silent: bool,
    pub(crate) keys: Vec<String>,
    pub(crate) templates: Templates,
    on_error: Option<ErrorHook>,
}

impl AppInner {
    /// Routes an error to the configured hook, or to the default one.
    /// Never fails: this is the last line of defense.
    pub(crate) fn emit_error(&self, err: &Error) {
        match &self.on_error {
            Some(hook) => hook(err),
            None => {
                if let Some(diagnostic) = render_error(err, self.silent) {
                    eprintln!();
                    eprintln!("{diagnostic}");
                    eprintln!();
                }
            }
        }
    }
}

/// Formats the default diagnostic, or `None` when suppressed.
///
/// Suppressed: benign not-found conditions, errors marked safe to expose
/// (already user-facing, nothing to report), and operator-requested
/// silence. The three checks are independent short-circuits.
fn render_error(err: &Error, silent: bool) -> Option<String> {
    if err.status() == StatusCode::NOT_FOUND || err.expose() {
        return None;
    }
    if silent {
        return None;
    }

    let mut lines = vec![err.to_string()];
    let mut cause = std::error::Error::source(err);
    while let Some(source) = cause {
        lines.push(format!("caused by: {source}"));
        cause = source.source();
    }

    Some(
        lines
            .iter()
            .flat_map(|line| line.lines())
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

// ── App ──────────────────────────────────────────────────────────────────────

/// The application under construction.
///
/// Every builder method consumes and returns `self`, so registration
/// chains naturally:
///
/// ```rust
/// use allium::{App, Context, Flow, Phased, Result};
///
/// struct RequestLog;
///
/// impl Phased for RequestLog {
///     fn name(&self) -> &'static str { "request-log" }
///     fn on_request(&self, ctx: &mut Context) -> Result<Flow> {
///         tracing::info!(path = ctx.path(), "request");
///         Ok(Flow::Continue)
///     }
/// }
///
/// let app = App::new()
///     .proxy(true)
///     .wrap_phased(RequestLog);
/// ```
pub struct App {
    middleware: Vec<Arc<dyn Middleware>>,
    env: String,
    proxy: bool,
    subdomain_offset: usize,
    silent: bool,
    keys: Vec<String>,
    templates: Templates,
    on_error: Option<ErrorHook>,
}

impl App {
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
            env: std::env::var("ALLIUM_ENV").unwrap_or_else(|_| "development".to_owned()),
            proxy: false,
            subdomain_offset: 2,
            silent: false,
            keys: Vec::new(),
            templates: Templates {
                context: HashMap::new(),
                request: HeaderMap::new(),
                response: HeaderMap::new(),
            },
            on_error: None,
        }
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Appends a middleware to the chain. Registration order is execution
    /// order for entry logic and the reverse for exit logic.
    pub fn wrap(mut self, middleware: impl Middleware) -> Self {
        let middleware = Arc::new(middleware);
        if middleware.converted() {
            warn!(
                middleware = middleware.name(),
                "two-phase middleware is deprecated; implement Middleware directly"
            );
        }
        debug!(middleware = middleware.name(), "use");
        self.middleware.push(middleware);
        self
    }

    /// Registers a plain function as middleware.
    pub fn wrap_fn<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.wrap(FnMiddleware::new(f))
    }

    /// Registers a two-phase middleware, normalizing it into the
    /// canonical shape.
    pub fn wrap_phased(self, phased: impl Phased) -> Self {
        self.wrap(Converted::new(phased))
    }

    // ── Settings ─────────────────────────────────────────────────────────────

    /// Environment tag. Defaults to `ALLIUM_ENV`, else `"development"`.
    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    /// Trust proxy-provided `X-Forwarded-*` headers.
    pub fn proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    /// Number of trailing domain labels ignored by
    /// [`Request::subdomains`](crate::Request::subdomains).
    pub fn subdomain_offset(mut self, offset: usize) -> Self {
        self.subdomain_offset = offset;
        self
    }

    /// Suppress the default error hook's diagnostics entirely.
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Cookie signing keys, newest first. Older keys still verify.
    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    // ── Templates ────────────────────────────────────────────────────────────

    /// Seeds a default visible through every context's state bag.
    pub fn context_default(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.templates.context.insert(key.into(), value.into());
        self
    }

    /// Declares a fallback request header assumed when a client omits it.
    pub fn request_default_header(mut self, name: &str, value: &str) -> Self {
        insert_header(&mut self.templates.request, name, value);
        self
    }

    /// Declares a header every response starts out with.
    pub fn response_default_header(mut self, name: &str, value: &str) -> Self {
        insert_header(&mut self.templates.response, name, value);
        self
    }

    /// Replaces the default error hook. The replacement sees every error,
    /// including the ones the default hook would suppress.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    // ── Introspection ────────────────────────────────────────────────────────

    /// The JSON projection of the application: exactly the three settings
    /// worth showing, nothing else.
    pub fn inspect(&self) -> Settings {
        Settings {
            subdomain_offset: self.subdomain_offset,
            proxy: self.proxy,
            env: self.env.clone(),
        }
    }

    // ── Activation ───────────────────────────────────────────────────────────

    /// Freezes the application into its per-request dispatcher.
    pub fn callback(self) -> Dispatcher {
        Dispatcher {
            app: Arc::new(AppInner {
                middleware: self.middleware,
                env: self.env,
                proxy: self.proxy,
                subdomain_offset: self.subdomain_offset,
                silent: self.silent,
                keys: self.keys,
                templates: self.templates,
                on_error: self.on_error,
            }),
        }
    }

    /// Binds the transport listener and serves requests through the
    /// composed dispatcher until graceful shutdown.
    pub async fn listen(self, addr: &str) -> Result<()> {
        debug!(%addr, "listen");
        Server::bind(addr).serve(self.callback()).await
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
        warn!(header = name, "invalid template header name dropped");
        return;
    };
    let Ok(value) = HeaderValue::from_str(value) else {
        warn!(header = %name, "invalid template header value dropped");
        return;
    };
    headers.insert(name, value);
}

// ── Settings ─────────────────────────────────────────────────────────────────

/// The introspectable application settings.
#[derive(Debug, Serialize)]
pub struct Settings {
    pub subdomain_offset: usize,
    pub proxy: bool,
    pub env: String,
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

/// The frozen application: one clone per connection, one call per request.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) app: Arc<AppInner>,
}

impl Dispatcher {
    /// The single entry point the transport calls for every request.
    ///
    /// Exactly one of response finalization or error completion runs per
    /// request, never both, never neither.
    pub async fn dispatch(
        &self,
        req: http::Request<RawBody>,
        remote_addr: Option<SocketAddr>,
    ) -> http::Response<RawBody> {
        let mut ctx = Context::new(Arc::clone(&self.app), req, remote_addr);
        let mut chain = Next::new(&self.app.middleware);
        match chain.run(&mut ctx).await {
            Ok(()) => respond(ctx),
            Err(err) => {
                self.app.emit_error(&err);
                fail(&err)
            }
        }
    }
}
