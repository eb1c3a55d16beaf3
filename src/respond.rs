//! Response finalization: the single terminating write.
//!
//! Once the chain settles, the context is inspected exactly once and turned
//! into the hyper response, first match wins:
//!
//! 1. automatic handling opted out: emit the facade's state untouched
//! 2. transport no longer writable: emit headers only
//! 3. body-forbidden status (204/205/304): discard the body
//! 4. HEAD: no payload; record the JSON length while headers are unsent
//! 5. no body: substitute the message, else the stringified status code
//! 6.–8. binary / text / stream bodies go out verbatim
//! 9. structured data is serialized as JSON
//!
//! Content-length is only ever written while headers are unsent; a partial
//! streamed response is never retro-labelled.

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use tracing::warn;

use crate::context::Context;
use crate::error::Error;
use crate::response::{raw_body, Body, RawBody, Response};

/// Statuses that forbid a message body.
fn status_empty(status: StatusCode) -> bool {
    matches!(status.as_u16(), 204 | 205 | 304)
}

/// Finalizes a settled context into the terminating response.
pub(crate) fn respond(ctx: Context) -> http::Response<RawBody> {
    let respond = ctx.respond;
    let request = ctx.request;
    let mut response = ctx.response;
    let mut cookies = ctx.cookies;

    // Cookies were "written" from the application's point of view the
    // moment they were set; they land on the wire on every path.
    for cookie in cookies.take_pending() {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers.append(header::SET_COOKIE, value);
            }
            Err(_) => warn!("invalid set-cookie value dropped"),
        }
    }

    // 1. A middleware wrote the response by hand: pass its state through
    //    without any automatic handling.
    if !respond {
        return passthrough(response);
    }

    let head = request.method() == Method::HEAD;
    let Response {
        status,
        mut headers,
        body,
        headers_sent,
        writable,
        message,
        ..
    } = response;

    // 2. Nothing can reach the peer anymore.
    if !writable {
        return assemble(status, headers, raw_body(Bytes::new()));
    }

    // 3. Body-forbidden status: drop the payload and its entity headers.
    if status_empty(status) {
        headers.remove(header::CONTENT_TYPE);
        headers.remove(header::CONTENT_LENGTH);
        headers.remove(header::TRANSFER_ENCODING);
        return assemble(status, headers, raw_body(Bytes::new()));
    }

    // 4. HEAD never carries a payload, but a structured body still
    //    determines the advertised length.
    if head {
        if !headers_sent {
            if let Body::Json(value) = &body {
                let len = serde_json::to_vec(value).map_or(0, |data| data.len());
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            }
        }
        return assemble(status, headers, raw_body(Bytes::new()));
    }

    match body {
        // 5. No body assigned: answer with the status message.
        Body::Empty => {
            let text = message.unwrap_or_else(|| status.as_str().to_owned());
            if !headers_sent {
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(text.len()));
            }
            assemble(status, headers, raw_body(text))
        }
        // 6. Raw bytes go out verbatim.
        Body::Binary(data) => assemble(status, headers, raw_body(data)),
        // 7. So does text.
        Body::Text(text) => assemble(status, headers, raw_body(text)),
        // 8. Streams are piped, frame by frame.
        Body::Stream(stream) => assemble(
            status,
            headers,
            StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
        ),
        // 9. Everything else is structured data.
        Body::Json(value) => {
            // Serializing a serde_json::Value cannot fail.
            let data = serde_json::to_vec(&value).unwrap_or_default();
            if !headers_sent {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(data.len()));
            }
            assemble(status, headers, raw_body(data))
        }
    }
}

/// Error completion: ends the response cycle for a rejected chain.
///
/// Accumulated headers are dropped; the client sees the error's status and
/// either its message (when exposed) or the canonical reason phrase.
pub(crate) fn fail(err: &Error) -> http::Response<RawBody> {
    let status = err.status();
    let text = if err.expose() {
        err.message().to_owned()
    } else {
        status
            .canonical_reason()
            .map_or_else(|| status.as_str().to_owned(), str::to_owned)
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(text.len()));
    assemble(status, headers, raw_body(text))
}

fn passthrough(response: Response) -> http::Response<RawBody> {
    let Response {
        status,
        headers,
        body,
        ..
    } = response;

    let body = match body {
        Body::Empty => raw_body(Bytes::new()),
        Body::Text(text) => raw_body(text),
        Body::Binary(data) => raw_body(data),
        Body::Stream(stream) => StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
        Body::Json(value) => raw_body(serde_json::to_vec(&value).unwrap_or_default()),
    };
    assemble(status, headers, body)
}

fn assemble(status: StatusCode, headers: HeaderMap, body: RawBody) -> http::Response<RawBody> {
    let mut res = http::Response::new(body);
    *res.status_mut() = status;
    *res.headers_mut() = headers;
    res
}

#[cfg(test)]
mod tests {
    use http::Method;
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::app::App;
    use crate::context::testing;
    use crate::cookies::SetCookie;

    async fn collect(res: http::Response<RawBody>) -> (StatusCode, HeaderMap, Bytes) {
        let (parts, body) = res.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        (parts.status, parts.headers, bytes)
    }

    fn ctx() -> Context {
        testing::context()
    }

    #[tokio::test]
    async fn untouched_context_finalizes_as_status_text() {
        let (status, headers, body) = collect(respond(ctx())).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(&body[..], b"404");
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "3");
    }

    #[tokio::test]
    async fn explicit_message_beats_the_status_code() {
        let mut ctx = ctx();
        ctx.set_status(StatusCode::SERVICE_UNAVAILABLE);
        ctx.set_message("warming up");

        let (status, _, body) = collect(respond(ctx)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(&body[..], b"warming up");
    }

    #[tokio::test]
    async fn body_forbidden_status_discards_the_body() {
        let mut ctx = ctx();
        ctx.set_status(StatusCode::NO_CONTENT);
        ctx.set_body("should vanish");

        let (status, headers, body) = collect(respond(ctx)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());
        assert!(headers.get(header::CONTENT_TYPE).is_none());
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
    }

    #[tokio::test]
    async fn head_with_structured_body_advertises_length_only() {
        let req = testing::request(Method::HEAD, "/ping");
        let mut ctx = testing::context_for(App::new(), req);
        let value = json!({ "pong": true });
        ctx.set_body(value.clone());

        let (status, headers, body) = collect(respond(ctx)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let expected = serde_json::to_vec(&value).unwrap().len().to_string();
        assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), &expected[..]);
    }

    #[tokio::test]
    async fn structured_body_serializes_with_matching_length() {
        let mut ctx = ctx();
        ctx.set_body(json!({ "status": 206 }));

        let (status, headers, body) = collect(respond(ctx)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], br#"{"status":206}"#);
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(
            headers.get(header::CONTENT_LENGTH).unwrap(),
            &body.len().to_string()[..]
        );
    }

    #[tokio::test]
    async fn text_and_binary_bodies_go_out_verbatim() {
        let mut text_ctx = ctx();
        text_ctx.set_body("plain as day");
        let (_, _, body) = collect(respond(text_ctx)).await;
        assert_eq!(&body[..], b"plain as day");

        let mut binary_ctx = ctx();
        binary_ctx.set_body(vec![0xde, 0xad, 0xbe, 0xef]);
        let (_, headers, body) = collect(respond(binary_ctx)).await;
        assert_eq!(&body[..], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn stream_bodies_are_piped() {
        let mut ctx = ctx();
        let chunks = vec![
            Ok(Bytes::from_static(b"chunk one, ")),
            Ok(Bytes::from_static(b"chunk two")),
        ];
        ctx.set_body(Body::stream(tokio_stream::iter(chunks)));

        let (status, headers, body) = collect(respond(ctx)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"chunk one, chunk two");
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
    }

    #[tokio::test]
    async fn opting_out_passes_state_through_untouched() {
        let mut ctx = ctx();
        ctx.set_respond(false);

        let (status, headers, body) = collect(respond(ctx)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.is_empty());
        // No automatic status text, no synthesized headers.
        assert!(headers.get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn unwritable_transport_gets_no_payload() {
        let mut ctx = ctx();
        ctx.set_body("never sent");
        ctx.response.set_writable(false);

        let (_, _, body) = collect(respond(ctx)).await;
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn sent_headers_freeze_content_length() {
        let mut ctx = ctx();
        ctx.response.set_headers_sent(true);

        let (_, headers, body) = collect(respond(ctx)).await;
        // The payload still completes the cycle, but headers stay as-is.
        assert_eq!(&body[..], b"404");
        assert!(headers.get(header::CONTENT_LENGTH).is_none());
        assert!(headers.get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn pending_cookies_land_on_the_response() {
        let mut ctx = ctx();
        ctx.cookies.set(SetCookie::new("sid", "abc"));
        ctx.set_body("ok");

        let (_, headers, _) = collect(respond(ctx)).await;
        let cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("sid=abc"));
    }

    #[tokio::test]
    async fn exposed_errors_reach_the_client() {
        let err = Error::new(StatusCode::IM_A_TEAPOT, "short and stout");
        let (status, _, body) = collect(fail(&err)).await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        assert_eq!(&body[..], b"short and stout");
    }

    #[tokio::test]
    async fn hidden_errors_show_the_reason_phrase_only() {
        let err = Error::internal("secret stack trace");
        let (status, _, body) = collect(fail(&err)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&body[..], b"Internal Server Error");
    }
}
