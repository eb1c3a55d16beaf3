//! Request facade over the raw transport request.
//!
//! Thin accessors over the parts hyper handed us, plus the derived fields
//! every request gets at creation: the immutable `original_url` snapshot,
//! the proxy-aware client IP, and the accept negotiator. Header lookups
//! fall back to the application's request template, so an application can
//! declare defaults for headers a client may omit.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http::header::HeaderMap;
use http::{Method, Uri, Version};

use crate::accept::Accept;
use crate::app::AppInner;
use crate::response::RawBody;

/// The request facade for one request.
pub struct Request {
    pub(crate) app: Arc<AppInner>,
    parts: http::request::Parts,
    body: Option<RawBody>,
    original_url: String,
    path: String,
    remote_addr: Option<SocketAddr>,
    ip: String,
    accept: Accept,
}

impl Request {
    pub(crate) fn new(
        app: Arc<AppInner>,
        req: http::Request<RawBody>,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let (parts, body) = req.into_parts();

        // Immutable snapshot of the URL as it arrived; rewriting `path`
        // later must not change it.
        let original_url = parts.uri.to_string();
        let path = parts.uri.path().to_owned();
        let accept = Accept::from_headers(&parts.headers);

        let mut request = Self {
            app,
            parts,
            body: Some(body),
            original_url,
            path,
            remote_addr,
            ip: String::new(),
            accept,
        };
        request.ip = request.derive_ip();
        request
    }

    /// First proxy-derived address, else the socket peer, else empty.
    fn derive_ip(&self) -> String {
        self.ips()
            .into_iter()
            .next()
            .or_else(|| self.remote_addr.map(|addr| addr.ip().to_string()))
            .unwrap_or_default()
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn version(&self) -> Version {
        self.parts.version
    }

    /// The raw request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Case-insensitive header lookup: the wire value wins, the
    /// application's request template backstops it.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts
            .headers
            .get(name)
            .or_else(|| self.app.templates.request.get(name))
            .and_then(|v| v.to_str().ok())
    }

    /// The routed path. Starts as the request path and may be rewritten.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// The URL as it arrived, before any rewriting.
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    pub fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    /// Client IP: first entry of [`Request::ips`], else the socket's
    /// remote address, else empty.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// The `X-Forwarded-For` chain, client first. Empty unless the
    /// application trusts its proxy.
    pub fn ips(&self) -> Vec<String> {
        if !self.app.proxy {
            return Vec::new();
        }
        self.header("x-forwarded-for")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `"https"` when a trusted proxy says so, else `"http"`. TLS itself
    /// terminates upstream; this core never sees a handshake.
    pub fn protocol(&self) -> &str {
        if self.app.proxy {
            if let Some(forwarded) = self.header("x-forwarded-proto") {
                if let Some(proto) = forwarded.split(',').next() {
                    let proto = proto.trim();
                    if !proto.is_empty() {
                        return proto;
                    }
                }
            }
        }
        "http"
    }

    pub fn secure(&self) -> bool {
        self.protocol() == "https"
    }

    /// Request host: `X-Forwarded-Host` under a trusted proxy, else the
    /// `Host` header, else the URI authority.
    pub fn host(&self) -> Option<&str> {
        if self.app.proxy {
            if let Some(forwarded) = self.header("x-forwarded-host") {
                return forwarded.split(',').next().map(str::trim);
            }
        }
        self.header("host").or_else(|| self.parts.uri.host())
    }

    /// Subdomain labels, closest to the registered domain first.
    ///
    /// With the default offset of 2, `tobi.ferrets.example.com` yields
    /// `["ferrets", "tobi"]`. IP hosts have no subdomains.
    pub fn subdomains(&self) -> Vec<String> {
        let Some(host) = self.host() else {
            return Vec::new();
        };
        let host = host.split(':').next().unwrap_or(host);
        if host.parse::<IpAddr>().is_ok() {
            return Vec::new();
        }

        let labels: Vec<&str> = host.split('.').collect();
        let offset = self.app.subdomain_offset;
        if labels.len() <= offset {
            return Vec::new();
        }
        labels[..labels.len() - offset]
            .iter()
            .rev()
            .map(|label| (*label).to_owned())
            .collect()
    }

    /// The accept negotiator parsed from this request.
    pub fn accept(&self) -> &Accept {
        &self.accept
    }

    /// Takes ownership of the raw request body. Subsequent calls return
    /// `None`; the body is a stream and can only be consumed once.
    pub fn take_body(&mut self) -> Option<RawBody> {
        self.body.take()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Environment tag of the owning application.
    pub fn env(&self) -> &str {
        &self.app.env
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use crate::app::App;
    use crate::context::testing;

    #[tokio::test]
    async fn body_can_be_taken_exactly_once() {
        let req = testing::request_with_body(http::Method::POST, "/ingest", "payload");
        let mut ctx = testing::context_for(App::new(), req);

        let body = ctx.request.take_body().expect("first take");
        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"payload");

        assert!(ctx.request.take_body().is_none());
    }

    #[test]
    fn original_url_survives_path_rewriting() {
        let req = testing::request(http::Method::GET, "/users/42?fields=name");
        let mut ctx = testing::context_for(App::new(), req);

        ctx.request.set_path("/rewritten");
        assert_eq!(ctx.request.path(), "/rewritten");
        assert_eq!(ctx.request.original_url(), "/users/42?fields=name");
        assert_eq!(ctx.request.query(), Some("fields=name"));
    }

    #[test]
    fn forwarded_ips_require_proxy_trust() {
        let req = testing::request_with_headers(
            http::Method::GET,
            "/",
            &[("x-forwarded-for", "1.1.1.1, 2.2.2.2")],
        );
        let ctx = testing::context_for(App::new(), req);
        assert!(ctx.request.ips().is_empty());

        let req = testing::request_with_headers(
            http::Method::GET,
            "/",
            &[("x-forwarded-for", "1.1.1.1, 2.2.2.2")],
        );
        let ctx = testing::context_for(App::new().proxy(true), req);
        assert_eq!(ctx.request.ips(), vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(ctx.request.ip(), "1.1.1.1");
    }

    #[test]
    fn ip_falls_back_to_socket_then_empty() {
        let remote = "127.0.0.1:9999".parse().unwrap();
        let req = testing::request(http::Method::GET, "/");
        let ctx = testing::context_with_remote(App::new(), req, Some(remote));
        assert_eq!(ctx.request.ip(), "127.0.0.1");

        let req = testing::request(http::Method::GET, "/");
        let ctx = testing::context_for(App::new(), req);
        assert_eq!(ctx.request.ip(), "");
    }

    #[test]
    fn subdomains_honor_the_offset() {
        let req = testing::request_with_headers(
            http::Method::GET,
            "/",
            &[("host", "tobi.ferrets.example.com")],
        );
        let ctx = testing::context_for(App::new(), req);
        assert_eq!(ctx.request.subdomains(), vec!["ferrets", "tobi"]);

        let req = testing::request_with_headers(
            http::Method::GET,
            "/",
            &[("host", "tobi.ferrets.example.com")],
        );
        let ctx = testing::context_for(App::new().subdomain_offset(3), req);
        assert_eq!(ctx.request.subdomains(), vec!["tobi"]);
    }

    #[test]
    fn ip_hosts_have_no_subdomains() {
        let req =
            testing::request_with_headers(http::Method::GET, "/", &[("host", "127.0.0.1:3000")]);
        let ctx = testing::context_for(App::new(), req);
        assert!(ctx.request.subdomains().is_empty());
    }

    #[test]
    fn template_headers_backstop_the_wire() {
        let app = App::new().request_default_header("accept-language", "en");
        let req = testing::request(http::Method::GET, "/");
        let ctx = testing::context_for(app, req);
        assert_eq!(ctx.request.header("accept-language"), Some("en"));

        let app = App::new().request_default_header("accept-language", "en");
        let req = testing::request_with_headers(
            http::Method::GET,
            "/",
            &[("accept-language", "fr")],
        );
        let ctx = testing::context_for(app, req);
        assert_eq!(ctx.request.header("accept-language"), Some("fr"));
    }

    #[test]
    fn forwarded_proto_drives_secure() {
        let req = testing::request_with_headers(
            http::Method::GET,
            "/",
            &[("x-forwarded-proto", "https")],
        );
        let ctx = testing::context_for(App::new().proxy(true), req);
        assert!(ctx.request.secure());

        let req = testing::request_with_headers(
            http::Method::GET,
            "/",
            &[("x-forwarded-proto", "https")],
        );
        let ctx = testing::context_for(App::new(), req);
        assert!(!ctx.request.secure());
    }
}
