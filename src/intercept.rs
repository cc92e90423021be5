//! Request pipeline: cache-busting, classification, strategy

use std::sync::Arc;

use reqwest::Method;
use tracing::debug;
use url::Url;

use crate::busting::CacheBuster;
use crate::classify::classify;
use crate::http::{Request, Response};
use crate::strategy::{invalid_request_response, StrategyExecutor};

/// Runs intercepted requests through the injector, classifier and executor
pub struct Interceptor {
    buster: CacheBuster,
    api_marker: String,
    executor: Arc<StrategyExecutor>,
}

impl Interceptor {
    pub fn new(buster: CacheBuster, api_marker: impl Into<String>, executor: Arc<StrategyExecutor>) -> Self {
        Self {
            buster,
            api_marker: api_marker.into(),
            executor,
        }
    }

    /// Handles a request on behalf of an active version
    pub async fn intercept(&self, request: Request) -> Response {
        let request = match self.buster.apply(request) {
            Ok(request) => request,
            Err(err) => return invalid_request_response(&err.to_string()),
        };
        if request.method != Method::GET {
            debug!(method = %request.method, url = %request.url, "bypassing cache for non-GET");
            return self.executor.pass_through(request).await;
        }

        let url = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(err) => return invalid_request_response(&err.to_string()),
        };
        let class = classify(&url, request.destination, &self.api_marker);
        debug!(url = %request.url, ?class, "intercepted request");
        self.executor.execute(request, class).await
    }

    /// Sends a request to the network untouched by any cache
    ///
    /// Used while the owning version is not (or no longer) active.
    pub async fn bypass(&self, mut request: Request) -> Response {
        match self.buster.resolve(&request.url) {
            Ok(url) => request.url = url.into(),
            Err(err) => return invalid_request_response(&err.to_string()),
        }
        self.executor.pass_through(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, CachedEntry, MemoryStore, RequestKey};
    use crate::fetch::{FetchError, Fetcher};
    use crate::retry::RetryQueue;
    use crate::strategy::FALLBACK_HEADER;
    use crate::version::VersionToken;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every URL it is asked for
    #[derive(Default)]
    struct RecordingNetwork {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetcher for RecordingNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            self.urls.lock().unwrap().push(request.url.clone());
            Ok(Response::new(200, "live"))
        }
    }

    fn interceptor(store: Arc<MemoryStore>, network: Arc<RecordingNetwork>) -> Interceptor {
        let token = VersionToken::parse("1").unwrap();
        let executor = StrategyExecutor::new(
            store,
            network,
            Arc::new(RetryQueue::new(4)),
            &token,
            "https://a.test/?v=1",
        );
        Interceptor::new(
            CacheBuster::new(Url::parse("https://a.test").unwrap(), token),
            "/api/",
            Arc::new(executor),
        )
    }

    #[tokio::test]
    async fn test_get_is_busted_before_lookup() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(
                "static-v1",
                CachedEntry::from_response(
                    RequestKey::get("https://a.test/app.js?v=1"),
                    &Response::new(200, "cached"),
                ),
            )
            .await
            .unwrap();
        let network = Arc::new(RecordingNetwork::default());

        let response = interceptor(store, network.clone())
            .intercept(Request::get("/app.js"))
            .await;

        assert_eq!(response.body.as_ref(), b"cached");
        assert!(network.urls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_post_goes_to_network_unbusted() {
        let store = Arc::new(MemoryStore::new());
        let network = Arc::new(RecordingNetwork::default());

        let response = interceptor(store.clone(), network.clone())
            .intercept(Request::new(Method::POST, "/api/progress"))
            .await;

        assert_eq!(response.body.as_ref(), b"live");
        assert_eq!(
            *network.urls.lock().unwrap(),
            vec!["https://a.test/api/progress".to_string()]
        );
        assert!(store.generation_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bypass_resolves_without_busting() {
        let network = Arc::new(RecordingNetwork::default());

        interceptor(Arc::new(MemoryStore::new()), network.clone())
            .bypass(Request::get("/app.js"))
            .await;

        assert_eq!(*network.urls.lock().unwrap(), vec!["https://a.test/app.js".to_string()]);
    }

    #[tokio::test]
    async fn test_unresolvable_url_gets_400() {
        let network = Arc::new(RecordingNetwork::default());

        let response = interceptor(Arc::new(MemoryStore::new()), network.clone())
            .intercept(Request::get("http://[::1"))
            .await;

        assert_eq!(response.status, 400);
        assert_eq!(response.header(FALLBACK_HEADER), Some("invalid-request"));
        assert!(network.urls.lock().unwrap().is_empty());
    }
}
