//! Single-flight execution of collection population.
//!
//! At most one population attempt per key is in flight. Requests that
//! arrive while it runs do not start their own attempt; they wait for it and
//! receive the same outcome, success or [`QueryError`]. A failed attempt is
//! forgotten as soon as it lands, so the next request retries.
//!
//! The attempt runs in a spawned task, so it completes even when every
//! waiting caller has gone away.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use crate::error::QueryError;

type Outcome = Option<Result<(), QueryError>>;

#[derive(Default)]
pub struct InFlight {
    table: Mutex<HashMap<String, watch::Receiver<Outcome>>>,
}

/// Clears the table entry when the attempt's task ends, panics included.
struct Landing {
    flights: Arc<InFlight>,
    key: String,
}

impl Drop for Landing {
    fn drop(&mut self) {
        self.flights
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the attempt in flight for `key`, or start one with `start`.
    ///
    /// `start` is only called when no attempt is in flight.
    pub async fn run<F, Fut>(self: &Arc<Self>, key: &str, start: F) -> Result<(), QueryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        let mut rx = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            match table.get(key) {
                Some(rx) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    table.insert(key.to_string(), rx.clone());
                    let landing = Landing {
                        flights: Arc::clone(self),
                        key: key.to_string(),
                    };
                    let attempt = start();
                    tokio::spawn(async move {
                        let outcome = attempt.await;
                        // Leave the table before publishing, so a request
                        // that sees this outcome cannot join this attempt.
                        drop(landing);
                        let _ = tx.send(Some(outcome));
                    });
                    rx
                }
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(landed) => landed.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(QueryError::internal(
                "population task ended without an outcome",
            ))
        })
    }

    /// Number of attempts currently in flight.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
