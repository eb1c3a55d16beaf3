//! Unified error type.
//!
//! Middleware reports failure by returning an [`Error`]. The status code
//! decides what the client sees; the `expose` flag decides whether the
//! message itself is safe to send. A 4xx is considered user-facing and
//! exposed by default; everything else is not, and the client gets the
//! canonical reason phrase instead.

use std::fmt;

use http::StatusCode;

/// Crate-wide result alias. Middleware returns `Result<()>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type carried through the middleware chain.
#[derive(Debug)]
pub struct Error {
    status: StatusCode,
    message: String,
    expose: bool,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// An error with the given status and message.
    ///
    /// The message is exposed to the client for client-error (4xx) statuses
    /// and hidden otherwise; override with [`Error::with_expose`].
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            expose: status.is_client_error(),
            source: None,
        }
    }

    /// A `500 Internal Server Error`, never exposed.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// A failure reported by the transport after the chain settled,
    /// typically during the final flush.
    pub fn transport(source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "late transport failure".to_owned(),
            expose: false,
            source: Some(source.into()),
        }
    }

    /// Overrides whether the message is sent to the client.
    pub fn with_expose(mut self, expose: bool) -> Self {
        self.expose = expose;
        self
    }

    /// Attaches an underlying cause.
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn expose(&self) -> bool {
        self.expose
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|s| s as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "io error".to_owned(),
            expose: false,
            source: Some(Box::new(e)),
        }
    }
}
