//! # allium
//!
//! A minimal middleware-first HTTP framework. The framework is the
//! composition, and nothing else.
//!
//! ## The contract
//!
//! allium owns exactly three things:
//!
//! - **The onion.** Middleware registered with [`App::wrap`] run in order
//!   on the way in and in reverse on the way out, around one shared
//!   per-request [`Context`]. One chain, one deterministic control flow.
//! - **The context.** Request and response facades over the raw transport,
//!   a request-scoped state bag layered over application defaults, cookies,
//!   content negotiation. Created per request, never reused.
//! - **The finish line.** When the chain settles, one finalizer interprets
//!   whatever the context holds (nothing, text, bytes, a stream, structured
//!   data) against HTTP semantics and performs the single terminating
//!   write. Errors end the cycle too; no request is left hanging.
//!
//! Routing, templating and sessions are middleware's business, not the
//! framework's. Register what you need; the core stays out of the way.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use allium::{App, BoxFuture, Context, Next, Result};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = App::new()
//!         .wrap_fn(logger)
//!         .wrap_fn(hello);
//!
//!     app.listen("0.0.0.0:3000").await.unwrap();
//! }
//!
//! // Entry logic runs outer to inner; exit logic inner to outer.
//! fn logger<'a>(ctx: &'a mut Context, mut next: Next<'a>) -> BoxFuture<'a, Result<()>> {
//!     Box::pin(async move {
//!         next.run(ctx).await?;
//!         tracing::info!(status = %ctx.status(), path = ctx.path(), "handled");
//!         Ok(())
//!     })
//! }
//!
//! fn hello<'a>(ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a, Result<()>> {
//!     Box::pin(async move {
//!         ctx.set_body("Hello, World!");
//!         Ok(())
//!     })
//! }
//! ```
//!
//! An untouched context finalizes as `404` with the body `"404"`; setting
//! a body promotes the status to `200` unless one was set explicitly. Set
//! structured data (`serde_json::Value`) and it goes out as JSON with a
//! computed content-length; set a stream and it is piped.

mod accept;
mod app;
mod context;
mod cookies;
mod error;
mod middleware;
mod request;
mod respond;
mod response;
mod server;

pub use accept::Accept;
pub use app::{App, Dispatcher, Settings};
pub use context::Context;
pub use cookies::{Cookies, SameSite, SetCookie};
pub use error::{Error, Result};
pub use middleware::{BoxFuture, Flow, FnMiddleware, Middleware, Next, Phased};
pub use request::Request;
pub use response::{Body, RawBody, Response};
pub use server::Server;
