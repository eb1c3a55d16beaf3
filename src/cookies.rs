//! Cookie jar.
//!
//! Each request gets one jar: incoming cookies parsed from the `Cookie`
//! header, outgoing cookies queued until the finalizer writes them as
//! `Set-Cookie` headers. The jar is bound to the application's signing
//! keys and to the request's secure flag; signed cookies carry an
//! HMAC-SHA256 companion cookie (`<name>.sig`) and verify against any
//! configured key, so keys can rotate.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use http::header::{self, HeaderMap};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// The per-request cookie jar.
pub struct Cookies {
    jar: HashMap<String, String>,
    pending: Vec<String>,
    keys: Vec<String>,
    secure: bool,
}

impl Cookies {
    pub(crate) fn new(headers: &HeaderMap, keys: Vec<String>, secure: bool) -> Self {
        let jar = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| {
                pair.split_once('=')
                    .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
            })
            .collect();

        Self {
            jar,
            pending: Vec::new(),
            keys,
            secure,
        }
    }

    /// Value of an incoming cookie.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.jar.get(name).map(String::as_str)
    }

    /// Queues a cookie for the response.
    pub fn set(&mut self, cookie: SetCookie) {
        self.pending.push(cookie.serialize(self.secure));
    }

    /// Value of an incoming signed cookie, or `None` when the signature
    /// is missing or matches no configured key.
    pub fn get_signed(&self, name: &str) -> Option<&str> {
        let value = self.jar.get(name)?;
        let signature = self.jar.get(&format!("{name}.sig"))?;
        self.keys
            .iter()
            .any(|key| verify(key, name, value, signature))
            .then_some(value.as_str())
    }

    /// Queues a signed cookie: the cookie itself plus its signature
    /// companion, signed with the newest key.
    pub fn set_signed(&mut self, cookie: SetCookie) -> Result<()> {
        let key = self
            .keys
            .first()
            .ok_or_else(|| Error::internal("signed cookies require application keys"))?;

        let signature = sign(key, &cookie.name, &cookie.value);
        let companion = SetCookie {
            name: format!("{}.sig", cookie.name),
            value: signature,
            ..cookie.clone()
        };
        self.set(cookie);
        self.set(companion);
        Ok(())
    }

    /// Drains the queued `Set-Cookie` values. Called once, by the
    /// finalizer.
    pub(crate) fn take_pending(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }
}

fn mac(key: &str, name: &str, value: &str) -> HmacSha256 {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("hmac key");
    mac.update(name.as_bytes());
    mac.update(b"=");
    mac.update(value.as_bytes());
    mac
}

fn sign(key: &str, name: &str, value: &str) -> String {
    URL_SAFE_NO_PAD.encode(mac(key, name, value).finalize().into_bytes())
}

fn verify(key: &str, name: &str, value: &str, signature: &str) -> bool {
    let Ok(decoded) = URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };
    mac(key, name, value).verify_slice(&decoded).is_ok()
}

// ── SetCookie ────────────────────────────────────────────────────────────────

/// `SameSite` attribute values.
#[derive(Clone, Copy, Debug)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// An outgoing cookie, built fluently and queued with
/// [`Cookies::set`] or [`Cookies::set_signed`].
#[derive(Clone, Debug)]
pub struct SetCookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: Option<u64>,
    http_only: bool,
    secure: Option<bool>,
    same_site: Option<SameSite>,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: Some("/".to_owned()),
            domain: None,
            max_age: None,
            http_only: true,
            secure: None,
            same_site: None,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Lifetime in seconds. Session cookie when unset.
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Overrides the `Secure` attribute. When unset, the attribute
    /// follows the request's secure flag.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    fn serialize(&self, secure_default: bool) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            out.push_str("; Max-Age=");
            out.push_str(&max_age.to_string());
        }
        if let Some(same_site) = self.same_site {
            out.push_str("; SameSite=");
            out.push_str(same_site.as_str());
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure.unwrap_or(secure_default) {
            out.push_str("; Secure");
        }
        out
    }
}
