//! Minimal allium demo: two onion middleware and a JSON body.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/
//!   curl -i http://localhost:3000/favicon.ico
//!   curl -I http://localhost:3000/

use allium::{App, BoxFuture, Context, Next, Result};
use serde_json::json;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = App::new()
        .wrap_fn(edges)
        .wrap_fn(payload);

    tracing::info!(settings = %app.inspect(), "starting");

    app.listen("0.0.0.0:3000").await.expect("server error");
}

// Outer middleware: its entry logic runs first, its exit logic runs last.
// Returning without calling `next` short-circuits the chain, so favicon
// requests finalize as the bare 404 default.
fn edges<'a>(ctx: &'a mut Context, mut next: Next<'a>) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        if ctx.path() == "/favicon.ico" {
            return Ok(());
        }
        tracing::info!("entering");
        next.run(ctx).await?;
        tracing::info!(status = %ctx.status(), "leaving");
        Ok(())
    })
}

// Inner middleware: assigns structured data. The finalizer serializes it,
// sets content-length, and a HEAD request gets the length without the body.
fn payload<'a>(ctx: &'a mut Context, mut next: Next<'a>) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        ctx.set_body(json!({ "status": 206 }));
        next.run(ctx).await?;
        Ok(())
    })
}
