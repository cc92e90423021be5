//! Replay queue for failed mutating requests
//!
//! Non-GET requests that fail to reach the network are parked here and replayed
//! when the host reports connectivity again (a `sync` event). The policy is
//! deliberately small:
//!
//! - bounded FIFO; when full the oldest entry is evicted
//! - one replay attempt per entry, sequential, in enqueue order
//! - a failed replay (transport error or non-2xx status) drops the entry
//! - no backoff and no re-enqueue

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::fetch::Fetcher;
use crate::http::Request;

/// Outcome of one replay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Requests that reached the network with a 2xx status
    pub replayed: usize,
    /// Requests dropped after their single replay attempt failed
    pub dropped: usize,
}

/// Bounded FIFO of requests awaiting replay
#[derive(Debug)]
pub struct RetryQueue {
    entries: Mutex<VecDeque<Request>>,
    capacity: usize,
}

impl RetryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Request>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Parks a request, returning the entry evicted to make room, if any
    ///
    /// With zero capacity nothing is kept and the request itself is returned.
    pub fn enqueue(&self, mut request: Request) -> Option<Request> {
        if self.capacity == 0 {
            return Some(request);
        }
        // A parked request outlives its caller
        request.abort = None;

        let mut entries = self.lock();
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            warn!(method = %old.method, url = %old.url, "retry queue full, evicting oldest request");
        }
        debug!(method = %request.method, url = %request.url, "request queued for replay");
        entries.push_back(request);
        evicted
    }

    /// Number of parked requests
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drains the queue and replays each request once, in order
    ///
    /// Requests enqueued while the replay is running wait for the next pass.
    pub async fn replay(&self, fetcher: &dyn Fetcher) -> SyncReport {
        let pending: Vec<Request> = self.lock().drain(..).collect();
        let mut report = SyncReport::default();

        for request in pending {
            match fetcher.fetch(&request).await {
                Ok(response) if response.is_success() => {
                    debug!(method = %request.method, url = %request.url, "replayed request");
                    report.replayed += 1;
                }
                Ok(response) => {
                    warn!(
                        method = %request.method,
                        url = %request.url,
                        status = response.status,
                        "replay rejected, dropping request"
                    );
                    report.dropped += 1;
                }
                Err(err) => {
                    warn!(
                        method = %request.method,
                        url = %request.url,
                        error = %err,
                        "replay failed, dropping request"
                    );
                    report.dropped += 1;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::http::Response;
    use async_trait::async_trait;
    use reqwest::Method;

    /// Answers by URL suffix and records the order of calls
    struct ScriptedFetcher {
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            self.calls.lock().unwrap().push(request.url.clone());
            if request.url.ends_with("offline") {
                Err(FetchError::Unreachable("offline".to_string()))
            } else if request.url.ends_with("rejected") {
                Ok(Response::new(500, "no"))
            } else {
                Ok(Response::new(201, "ok"))
            }
        }
    }

    fn post(url: &str) -> Request {
        Request::new(Method::POST, url).with_body("{}")
    }

    #[tokio::test]
    async fn test_replay_is_fifo_and_once() {
        let queue = RetryQueue::new(10);
        queue.enqueue(post("https://a.test/api/one"));
        queue.enqueue(post("https://a.test/api/two"));
        queue.enqueue(post("https://a.test/api/three"));
        let fetcher = ScriptedFetcher::new();

        let report = queue.replay(&fetcher).await;

        assert_eq!(report, SyncReport { replayed: 3, dropped: 0 });
        assert_eq!(
            fetcher.calls(),
            vec![
                "https://a.test/api/one",
                "https://a.test/api/two",
                "https://a.test/api/three"
            ]
        );
        assert!(queue.is_empty());

        let second = queue.replay(&fetcher).await;
        assert_eq!(second, SyncReport::default());
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_replays_are_dropped_not_requeued() {
        let queue = RetryQueue::new(10);
        queue.enqueue(post("https://a.test/api/offline"));
        queue.enqueue(post("https://a.test/api/rejected"));
        queue.enqueue(post("https://a.test/api/fine"));
        let fetcher = ScriptedFetcher::new();

        let report = queue.replay(&fetcher).await;

        assert_eq!(report, SyncReport { replayed: 1, dropped: 2 });
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_evicts_oldest() {
        let queue = RetryQueue::new(2);
        assert!(queue.enqueue(post("https://a.test/1")).is_none());
        assert!(queue.enqueue(post("https://a.test/2")).is_none());

        let evicted = queue.enqueue(post("https://a.test/3")).unwrap();

        assert_eq!(evicted.url, "https://a.test/1");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let queue = RetryQueue::new(0);
        let returned = queue.enqueue(post("https://a.test/1")).unwrap();
        assert_eq!(returned.url, "https://a.test/1");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_strips_abort_signal() {
        let queue = RetryQueue::new(1);
        let (handle, signal) = crate::http::abort_pair();
        queue.enqueue(post("https://a.test/1").with_abort(signal));
        handle.abort();

        let parked = queue.lock().front().cloned().unwrap();
        assert!(parked.abort.is_none());
    }
}
