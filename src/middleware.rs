//! Middleware and the onion composer.
//!
//! A middleware receives the per-request [`Context`] and a [`Next`]
//! continuation standing for the rest of the chain. Code before
//! `next.run(ctx)` executes in registration order, outer to inner; code
//! after it executes in reverse, inner to outer. That is the entire
//! control-flow model: one deterministic onion, no priorities, no
//! reordering.
//!
//! ```text
//! request  → A(pre) → B(pre) → C(pre) ─┐
//! response ← A(post) ← B(post) ← C(post)┘
//! ```
//!
//! Two shapes are accepted. The canonical shape implements [`Middleware`]
//! (or is a plain `fn` registered through [`crate::App::wrap_fn`]). The
//! older two-phase shape implements [`Phased`] and is normalized into the
//! canonical one at registration; the composer itself never branches on
//! shape.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{Error, Result};

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` because the runtime polls the future in place; `Send` so
/// tokio may migrate it across worker threads between polls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of request-processing logic composed into the chain.
///
/// Implementations hold no per-request state: one instance serves every
/// request concurrently, which is why `handle` takes `&self` while all
/// mutable state lives on the [`Context`].
pub trait Middleware: Send + Sync + 'static {
    /// Processes one request.
    ///
    /// Call `next.run(ctx).await` exactly once to continue into the rest
    /// of the chain, or not at all to short-circuit. Calling it twice is a
    /// usage error and fails the whole chain.
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>>;

    /// Name used in registration diagnostics.
    fn name(&self) -> &'static str {
        "-"
    }

    /// True when this middleware was normalized from the two-phase shape.
    #[doc(hidden)]
    fn converted(&self) -> bool {
        false
    }
}

/// The continuation handed to each middleware: "the rest of the chain".
///
/// Each chain position gets its own `Next` with a single-use token. The
/// empty tail resolves immediately, so a chain with no middleware is a
/// no-op on the context.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    called: bool,
}

impl<'a> Next<'a> {
    pub(crate) fn new(remaining: &'a [Arc<dyn Middleware>]) -> Self {
        Self { remaining, called: false }
    }

    /// Runs the rest of the chain.
    ///
    /// A second invocation at the same position does not re-run any
    /// downstream middleware; it fails with a usage error instead.
    pub async fn run(&mut self, ctx: &mut Context) -> Result<()> {
        if self.called {
            return Err(Error::internal("next() called multiple times"));
        }
        self.called = true;
        match self.remaining.split_first() {
            None => Ok(()),
            Some((mw, rest)) => mw.handle(ctx, Next::new(rest)).await,
        }
    }
}

/// Adapter implementing [`Middleware`] for a plain function.
///
/// Used by [`crate::App::wrap_fn`]; `fn` items with the signature
/// `fn(&mut Context, Next<'_>) -> BoxFuture<'_, Result<()>>` coerce into it
/// directly.
pub struct FnMiddleware<F> {
    f: F,
}

impl<F> FnMiddleware<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        (self.f)(ctx, next)
    }
}

/// Verdict of a [`Phased`] middleware's request phase.
pub enum Flow {
    /// Continue into the rest of the chain.
    Continue,
    /// Stop here: skip the downstream chain and this middleware's own
    /// response phase. Whatever the context holds is finalized as-is.
    Halt,
}

/// The older two-phase middleware shape: a request hook running outer to
/// inner and a response hook running inner to outer, with the chain call
/// implicit between them.
///
/// Prefer implementing [`Middleware`]; this shape cannot await and cannot
/// see the continuation. It is kept for middleware written against the
/// request/response pipeline style and is adapted at registration time.
pub trait Phased: Send + Sync + 'static {
    fn name(&self) -> &'static str {
        "-"
    }

    /// Runs before the downstream chain.
    fn on_request(&self, ctx: &mut Context) -> Result<Flow> {
        let _ = ctx;
        Ok(Flow::Continue)
    }

    /// Runs after the downstream chain, in reverse registration order.
    fn on_response(&self, ctx: &mut Context) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Normalization adapter: makes a [`Phased`] middleware indistinguishable
/// from a canonical one at composition time. The wrapper doubles as the
/// conversion marker consulted for deprecation diagnostics.
pub(crate) struct Converted<P> {
    inner: P,
}

impl<P> Converted<P> {
    pub(crate) fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Phased> Middleware for Converted<P> {
    fn handle<'a>(&'a self, ctx: &'a mut Context, mut next: Next<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match self.inner.on_request(ctx)? {
                Flow::Halt => return Ok(()),
                Flow::Continue => {}
            }
            next.run(ctx).await?;
            self.inner.on_response(ctx)
        })
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn converted(&self) -> bool {
        true
    }
}
