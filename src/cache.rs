use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::errors::RowError;
use crate::normalize::GeocodeResult;

/// Result of asking the cache for a rendered URL.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<E> {
    /// Served from an earlier or in-flight row's successful request.
    Hit(GeocodeResult),
    /// This row issued the request and stored the result.
    Fetched(GeocodeResult),
    /// This row issued the request and it failed; nothing was stored.
    Failed(E),
    /// Another row's in-flight request for the same URL failed with this error.
    Joined(E),
}

type Settled<E> = Option<Result<GeocodeResult, E>>;

enum Slot<E> {
    Ready(GeocodeResult),
    InFlight(watch::Receiver<Settled<E>>),
}

/// Per-run memo of successful results keyed by rendered URL.
///
/// Rows that ask for a URL while its request is in flight wait for that
/// request and share its outcome, success or failure. Only successes are
/// stored, so a later row retries a URL that failed.
pub struct GeocodeCache<E = RowError> {
    entries: Mutex<HashMap<String, Slot<E>>>,
}

impl<E> Default for GeocodeCache<E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<E: Clone> GeocodeCache<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch<F, Fut>(&self, url: &str, fetch: F) -> CacheLookup<E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GeocodeResult, E>>,
    {
        loop {
            let waiting = {
                let mut entries = self.entries.lock();
                let waiting = match entries.get(url) {
                    Some(Slot::Ready(result)) => {
                        trace!(url, "cache hit");
                        return CacheLookup::Hit(result.clone());
                    }
                    // A closed sender with no value means the issuing row was dropped mid-request.
                    Some(Slot::InFlight(rx)) if rx.has_changed().is_ok() || rx.borrow().is_some() => {
                        Some(rx.clone())
                    }
                    _ => None,
                };
                match waiting {
                    Some(rx) => Ok(rx),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        entries.insert(url.to_string(), Slot::InFlight(rx));
                        Err(tx)
                    }
                }
            };
            let mut pending = match waiting {
                Ok(rx) => rx,
                Err(tx) => return self.issue(url, tx, fetch).await,
            };

            let settled = match pending.wait_for(Option::is_some).await {
                Ok(value) => value.clone(),
                Err(_) => None,
            };
            match settled {
                Some(Ok(result)) => {
                    trace!(url, "cache hit after waiting on in-flight request");
                    return CacheLookup::Hit(result);
                }
                Some(Err(err)) => {
                    trace!(url, "in-flight request failed");
                    return CacheLookup::Joined(err);
                }
                None => continue,
            }
        }
    }

    async fn issue<F, Fut>(
        &self,
        url: &str,
        tx: watch::Sender<Settled<E>>,
        fetch: F,
    ) -> CacheLookup<E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GeocodeResult, E>>,
    {
        let outcome = fetch().await;
        {
            let mut entries = self.entries.lock();
            match &outcome {
                Ok(result) => {
                    entries.insert(url.to_string(), Slot::Ready(result.clone()));
                }
                Err(_) => {
                    entries.remove(url);
                }
            }
            tx.send_replace(Some(outcome.clone()));
        }

        match outcome {
            Ok(result) => CacheLookup::Fetched(result),
            Err(err) => CacheLookup::Failed(err),
        }
    }
}
