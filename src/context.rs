//! Per-request context.
//!
//! One `Context` is created for every incoming request and discarded after
//! the response is finalized; nothing is pooled or reused. It owns the two
//! facades, the cookie jar, and a fresh state bag, and it carries the
//! application back-reference each facade shares. The original's prototype
//! delegation becomes explicit forwarding: the accessors below hand off to
//! the owned facades, so a mutation through any view is visible through
//! all of them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use http::{Method, StatusCode};
use serde_json::Value;

use crate::accept::Accept;
use crate::app::AppInner;
use crate::cookies::Cookies;
use crate::request::Request;
use crate::response::{Body, RawBody, Response};

/// The per-request aggregate threaded through the middleware chain.
pub struct Context {
    pub(crate) app: Arc<AppInner>,
    /// Request facade. Shares this context's lifetime.
    pub request: Request,
    /// Response facade. Shares this context's lifetime.
    pub response: Response,
    /// Cookie jar bound to this request and the application's keys.
    pub cookies: Cookies,
    state: HashMap<String, Value>,
    pub(crate) respond: bool,
}

impl Context {
    pub(crate) fn new(
        app: Arc<AppInner>,
        req: http::Request<RawBody>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let request = Request::new(Arc::clone(&app), req, remote_addr);
        let response = Response::new(Arc::clone(&app));

        let secure = request.secure();
        let cookies = Cookies::new(request.headers(), app.keys.clone(), secure);

        Self {
            app,
            request,
            response,
            cookies,
            state: HashMap::new(),
            respond: true,
        }
    }

    // ── State bag ────────────────────────────────────────────────────────────

    /// Request-scoped user data, layered over the application's context
    /// template: a miss in this request's bag falls through to the
    /// template's defaults.
    pub fn state(&self, key: &str) -> Option<&Value> {
        self.state
            .get(key)
            .or_else(|| self.app.templates.context.get(key))
    }

    /// Stores request-scoped data. Writes always land in this request's
    /// own bag; the template is never mutated.
    pub fn set_state(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.insert(key.into(), value.into());
    }

    // ── Finalization control ─────────────────────────────────────────────────

    /// Whether automatic response finalization is enabled. Disable it when
    /// a middleware has written the response by hand.
    pub fn respond(&self) -> bool {
        self.respond
    }

    pub fn set_respond(&mut self, respond: bool) {
        self.respond = respond;
    }

    // ── Request delegation ───────────────────────────────────────────────────

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.request.set_path(path);
    }

    pub fn original_url(&self) -> &str {
        self.request.original_url()
    }

    pub fn query(&self) -> Option<&str> {
        self.request.query()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    pub fn ip(&self) -> &str {
        self.request.ip()
    }

    pub fn ips(&self) -> Vec<String> {
        self.request.ips()
    }

    pub fn host(&self) -> Option<&str> {
        self.request.host()
    }

    pub fn subdomains(&self) -> Vec<String> {
        self.request.subdomains()
    }

    pub fn accept(&self) -> &Accept {
        self.request.accept()
    }

    // ── Response delegation ──────────────────────────────────────────────────

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.set_status(status);
    }

    pub fn body(&self) -> &Body {
        self.response.body()
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.response.set_body(body);
    }

    pub fn message(&self) -> Option<&str> {
        self.response.message()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.response.set_message(message);
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.response.set_header(name, value);
    }

    pub fn headers_sent(&self) -> bool {
        self.response.headers_sent()
    }

    pub fn writable(&self) -> bool {
        self.response.writable()
    }

    // ── Application delegation ───────────────────────────────────────────────

    /// Environment tag of the owning application.
    pub fn env(&self) -> &str {
        &self.app.env
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the crate's test modules.

    use super::*;
    use crate::app::App;
    use crate::response::raw_body;

    pub(crate) fn request(method: Method, uri: &str) -> http::Request<RawBody> {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(raw_body(bytes::Bytes::new()))
            .unwrap()
    }

    pub(crate) fn request_with_body(
        method: Method,
        uri: &str,
        body: &str,
    ) -> http::Request<RawBody> {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(raw_body(body.to_owned()))
            .unwrap()
    }

    pub(crate) fn request_with_headers(
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
    ) -> http::Request<RawBody> {
        let mut builder = http::Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(raw_body(bytes::Bytes::new())).unwrap()
    }

    pub(crate) fn context() -> Context {
        context_for(App::new(), request(Method::GET, "/"))
    }

    pub(crate) fn context_for(app: App, req: http::Request<RawBody>) -> Context {
        context_with_remote(app, req, None)
    }

    pub(crate) fn context_with_remote(
        app: App,
        req: http::Request<RawBody>,
        remote_addr: Option<SocketAddr>,
    ) -> Context {
        Context::new(app.callback().app, req, remote_addr)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing;
    use super::*;
    use crate::app::App;

    #[test]
    fn facades_share_one_application() {
        let ctx = testing::context();
        assert!(Arc::ptr_eq(&ctx.app, &ctx.request.app));
        assert!(Arc::ptr_eq(&ctx.app, &ctx.response.app));
    }

    #[test]
    fn status_mutation_is_visible_through_every_view() {
        let mut ctx = testing::context();
        ctx.set_status(StatusCode::ACCEPTED);
        assert_eq!(ctx.status(), StatusCode::ACCEPTED);
        assert_eq!(ctx.response.status(), StatusCode::ACCEPTED);

        ctx.response.set_body("direct");
        assert!(matches!(ctx.body(), Body::Text(t) if t == "direct"));
    }

    #[test]
    fn state_bags_are_never_shared_between_contexts() {
        let dispatcher = App::new().callback();

        let mut first = Context::new(
            Arc::clone(&dispatcher.app),
            testing::request(Method::GET, "/"),
            None,
        );
        let second = Context::new(
            Arc::clone(&dispatcher.app),
            testing::request(Method::GET, "/"),
            None,
        );

        first.set_state("user", json!("alice"));
        assert_eq!(first.state("user"), Some(&json!("alice")));
        assert_eq!(second.state("user"), None);
    }

    #[test]
    fn state_lookup_falls_through_to_the_template() {
        let app = App::new().context_default("version", json!("v2"));
        let mut ctx = testing::context_for(app, testing::request(Method::GET, "/"));

        assert_eq!(ctx.state("version"), Some(&json!("v2")));

        // A request-local write shadows the template without touching it.
        ctx.set_state("version", json!("override"));
        assert_eq!(ctx.state("version"), Some(&json!("override")));
    }

    #[test]
    fn response_template_headers_are_inherited() {
        let app = App::new().response_default_header("x-request-backend", "allium");
        let ctx = testing::context_for(app, testing::request(Method::GET, "/"));
        assert_eq!(ctx.response.header("x-request-backend"), Some("allium"));
    }

    #[test]
    fn fresh_context_carries_the_optimistic_default() {
        let ctx = testing::context();
        assert_eq!(ctx.status(), StatusCode::NOT_FOUND);
        assert!(ctx.body().is_empty());
        assert!(ctx.respond());
        assert!(ctx.writable());
        assert!(!ctx.headers_sent());
    }
}
