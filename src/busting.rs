//! Cache-busting URL rewriting
//!
//! Every outgoing GET is rewritten to carry the running version's token in a
//! `v` query parameter. Shared HTTP caches then see each deployment's resources
//! as distinct URLs, and request keys are partitioned by version for free.

use reqwest::Method;
use url::Url;

use crate::http::Request;
use crate::version::VersionToken;

/// Query parameter that carries the version token
pub const VERSION_PARAM: &str = "v";

/// Resolves request URLs against the origin and embeds the version token
#[derive(Debug, Clone)]
pub struct CacheBuster {
    origin: Url,
    token: VersionToken,
}

impl CacheBuster {
    pub fn new(origin: Url, token: VersionToken) -> Self {
        Self { origin, token }
    }

    /// Resolves a possibly-relative URL against the origin
    pub fn resolve(&self, raw: &str) -> Result<Url, url::ParseError> {
        self.origin.join(raw)
    }

    /// Appends the version marker unless the query already carries one
    pub fn bust(&self, mut url: Url) -> Url {
        let has_marker = url.query_pairs().any(|(name, _)| name == VERSION_PARAM);
        if !has_marker {
            url.query_pairs_mut()
                .append_pair(VERSION_PARAM, self.token.as_str());
        }
        url
    }

    /// Rewrites a request: every URL is resolved, GET URLs are also busted
    pub fn apply(&self, mut request: Request) -> Result<Request, url::ParseError> {
        let resolved = self.resolve(&request.url)?;
        let rewritten = if request.method == Method::GET {
            self.bust(resolved)
        } else {
            resolved
        };
        request.url = rewritten.into();
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buster(token: &str) -> CacheBuster {
        CacheBuster::new(
            Url::parse("https://app.example.com").unwrap(),
            VersionToken::parse(token).unwrap(),
        )
    }

    #[test]
    fn test_appends_marker_with_question_mark() {
        let request = buster("1.0.1-1699999999")
            .apply(Request::get("/app.js"))
            .unwrap();
        assert_eq!(request.url, "https://app.example.com/app.js?v=1.0.1-1699999999");
    }

    #[test]
    fn test_appends_marker_with_ampersand_to_existing_query() {
        let request = buster("1").apply(Request::get("/api/tts?text=hej")).unwrap();
        assert_eq!(request.url, "https://app.example.com/api/tts?text=hej&v=1");
    }

    #[test]
    fn test_existing_marker_is_left_untouched() {
        let request = buster("2")
            .apply(Request::get("https://app.example.com/app.js?v=1"))
            .unwrap();
        assert_eq!(request.url, "https://app.example.com/app.js?v=1");
    }

    #[test]
    fn test_applying_twice_busts_exactly_once() {
        let buster = buster("3");
        let once = buster.apply(Request::get("/index.html")).unwrap();
        let twice = buster.apply(once.clone()).unwrap();

        assert_eq!(once.url, twice.url);
        assert_eq!(twice.url.matches("v=3").count(), 1);
    }

    #[test]
    fn test_other_parameters_named_like_marker_do_not_count() {
        let request = buster("1").apply(Request::get("/a?version=9&vv=2")).unwrap();
        assert_eq!(request.url, "https://app.example.com/a?version=9&vv=2&v=1");
    }

    #[test]
    fn test_non_get_is_resolved_but_not_busted() {
        let request = buster("1")
            .apply(Request::new(Method::POST, "/api/progress"))
            .unwrap();
        assert_eq!(request.url, "https://app.example.com/api/progress");
    }

    #[test]
    fn test_absolute_urls_on_other_hosts_are_busted() {
        let request = buster("1")
            .apply(Request::get("https://cdn.example.net/font.woff2"))
            .unwrap();
        assert_eq!(request.url, "https://cdn.example.net/font.woff2?v=1");
    }
}
