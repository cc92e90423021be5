//! Request classification
//!
//! Pure mapping from a (cache-busted) URL and its destination to the class that
//! selects a caching strategy. Non-GET requests never get here.

use url::Url;

use crate::http::Destination;

/// File extensions treated as static assets
const STATIC_EXTENSIONS: &[&str] = &[
    "css", "js", "mjs", "wasm", "html", "htm", "json", "webmanifest", "png", "jpg", "jpeg",
    "gif", "svg", "webp", "ico", "woff", "woff2", "ttf", "otf", "mp3", "ogg", "wav",
];

/// Request classes, each bound to one strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Build asset (cache-first)
    Static,
    /// API call (network-first)
    Api,
    /// Document navigation (cache-first with offline document fallback)
    Navigation,
    /// Anything else (cache-first)
    Other,
}

/// Classifies a request
///
/// Precedence: the API marker in the path wins over everything, then document
/// navigations, then static-asset extensions.
pub fn classify(url: &Url, destination: Destination, api_marker: &str) -> RequestClass {
    let path = url.path();
    if !api_marker.is_empty() && path.contains(api_marker) {
        return RequestClass::Api;
    }
    if destination == Destination::Document {
        return RequestClass::Navigation;
    }

    let extension = path
        .rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension {
        Some(ext) if STATIC_EXTENSIONS.contains(&ext.as_str()) => RequestClass::Static,
        _ => RequestClass::Other,
    }
}
