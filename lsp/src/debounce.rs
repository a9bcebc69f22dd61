//! Per-document parse timers.
//!
//! Scheduling a parse for a document aborts that document's previous timer
//! and starts a new one. Each timer carries a generation so a timer that
//! fired just before being superseded is recognised as stale when its event
//! reaches the session.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParseDue {
    pub uri: Url,
    pub generation: u64,
}

#[derive(Debug)]
pub(crate) struct ParseDebouncer<E> {
    timers: HashMap<Url, JoinHandle<()>>,
    latest: HashMap<Url, u64>,
    next_generation: u64,
    events: mpsc::Sender<E>,
}

impl<E> ParseDebouncer<E>
where
    E: From<ParseDue> + Send + 'static,
{
    pub fn new(events: mpsc::Sender<E>) -> Self {
        Self {
            timers: HashMap::new(),
            latest: HashMap::new(),
            next_generation: 0,
            events,
        }
    }

    /// (Re)start the timer for `uri`. Returns the new generation.
    pub fn schedule(&mut self, uri: &Url, delay: Duration) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;

        let events = self.events.clone();
        let due = ParseDue {
            uri: uri.clone(),
            generation,
        };
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(E::from(due)).await;
        });

        if let Some(previous) = self.timers.insert(uri.clone(), timer) {
            previous.abort();
        }
        self.latest.insert(uri.clone(), generation);
        tracing::trace!(%uri, generation, delay_ms = delay.as_millis() as u64, "parse scheduled");
        generation
    }

    /// Whether `generation` is still the newest schedule for `uri`.
    pub fn is_current(&self, uri: &Url, generation: u64) -> bool {
        self.latest.get(uri) == Some(&generation)
    }

    /// Accept a fired timer. Returns `false` for a superseded one.
    pub fn fire(&mut self, due: &ParseDue) -> bool {
        if !self.is_current(&due.uri, due.generation) {
            return false;
        }
        self.timers.remove(&due.uri);
        true
    }

    /// Forget `uri` once its final parse result has been applied.
    pub fn forget(&mut self, uri: &Url) {
        if let Some(timer) = self.timers.remove(uri) {
            timer.abort();
        }
        self.latest.remove(uri);
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }
}

impl<E> Drop for ParseDebouncer<E> {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.abort();
        }
    }
}
