//! Accept-header negotiation.
//!
//! One negotiator is parsed per request and exposed as
//! [`Request::accept`](crate::Request::accept). A missing `Accept` header
//! means the client takes anything, per HTTP semantics.

use http::header::{self, HeaderMap};

/// A parsed `Accept` header: media ranges ordered by quality.
#[derive(Debug)]
pub struct Accept {
    ranges: Vec<MediaRange>,
}

#[derive(Debug)]
struct MediaRange {
    kind: String,
    subtype: String,
    quality: f32,
}

impl MediaRange {
    fn matches(&self, kind: &str, subtype: &str) -> bool {
        (self.kind == "*" || self.kind == kind) && (self.subtype == "*" || self.subtype == subtype)
    }
}

impl Accept {
    pub(crate) fn from_headers(headers: &HeaderMap) -> Self {
        let raw = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("*/*");

        let mut ranges: Vec<MediaRange> = raw.split(',').filter_map(parse_range).collect();
        // Stable sort: ties keep header order.
        ranges.sort_by(|a, b| {
            b.quality
                .partial_cmp(&a.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self { ranges }
    }

    /// The client's most preferred media range, `"type/subtype"`.
    pub fn preferred(&self) -> Option<String> {
        self.ranges
            .iter()
            .find(|r| r.quality > 0.0)
            .map(|r| format!("{}/{}", r.kind, r.subtype))
    }

    /// Whether the client accepts the given media type at any quality
    /// above zero.
    pub fn accepts(&self, mime: &str) -> bool {
        let Some((kind, subtype)) = mime.split_once('/') else {
            return false;
        };
        self.ranges
            .iter()
            .any(|r| r.quality > 0.0 && r.matches(kind, subtype))
    }

    /// Picks the best of the offered media types, by client quality then
    /// offer order. `None` when nothing offered is acceptable.
    pub fn negotiate<'a>(&self, offered: &[&'a str]) -> Option<&'a str> {
        let mut best: Option<(&'a str, f32)> = None;
        for offer in offered {
            let Some((kind, subtype)) = offer.split_once('/') else {
                continue;
            };
            let quality = self
                .ranges
                .iter()
                .find(|r| r.matches(kind, subtype))
                .map_or(0.0, |r| r.quality);
            if quality > 0.0 && best.is_none_or(|(_, q)| quality > q) {
                best = Some((offer, quality));
            }
        }
        best.map(|(offer, _)| offer)
    }

    pub fn accepts_json(&self) -> bool {
        self.accepts("application/json")
    }
}

fn parse_range(entry: &str) -> Option<MediaRange> {
    let mut parts = entry.split(';');
    let mime = parts.next()?.trim();
    let (kind, subtype) = mime.split_once('/')?;
    if kind.is_empty() || subtype.is_empty() {
        return None;
    }

    let mut quality = 1.0f32;
    for param in parts {
        if let Some((name, value)) = param.split_once('=') {
            if name.trim() == "q" {
                quality = value.trim().parse().unwrap_or(0.0);
            }
        }
    }

    Some(MediaRange {
        kind: kind.trim().to_owned(),
        subtype: subtype.trim().to_owned(),
        quality: quality.clamp(0.0, 1.0),
    })
}
