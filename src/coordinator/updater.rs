use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::net::{Endpoint, Message};
use crate::types::{CacheId, Result, ShardId, WeftError};

use super::classifier::RoundSummary;
use super::Coordinator;

/// Commands for the cache updater thread.
pub enum CacheUpdaterMessage {
    /// Run a round now.
    Trigger,
    /// Exit the loop.
    Shutdown,
}

/// Background thread running [`Coordinator::run_cache_round`] every interval.
pub struct CacheUpdater {
    sender: Sender<CacheUpdaterMessage>,
    thread: Option<JoinHandle<()>>,
}

impl CacheUpdater {
    /// Spawns the updater for `coordinator`.
    pub fn spawn(coordinator: Coordinator, interval: Duration) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("weft-cache-updater".into())
            .spawn(move || Self::updater_loop(&coordinator, &receiver, interval))?;
        Ok(Self {
            sender,
            thread: Some(thread),
        })
    }

    /// Requests an immediate round. Returns `false` once the updater has stopped.
    pub fn trigger(&self) -> bool {
        self.sender.send(CacheUpdaterMessage::Trigger).is_ok()
    }

    /// Stops the loop and joins the thread.
    pub fn shutdown(&mut self) {
        let _ = self.sender.send(CacheUpdaterMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("coordinator.cache_updater.panicked");
            }
        }
    }

    fn updater_loop(
        coordinator: &Coordinator,
        receiver: &Receiver<CacheUpdaterMessage>,
        interval: Duration,
    ) {
        loop {
            match receiver.recv_timeout(interval) {
                Ok(CacheUpdaterMessage::Trigger) | Err(RecvTimeoutError::Timeout) => {
                    match coordinator.run_cache_round() {
                        Ok(_) => {}
                        Err(WeftError::Disconnected(_)) => break,
                        Err(err) => warn!(error = %err, "coordinator.cache_updater.round_failed"),
                    }
                }
                Ok(CacheUpdaterMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("coordinator.cache_updater.stopped");
    }
}

impl Drop for CacheUpdater {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Coordinator {
    /// Broadcasts the pending cache classification to every shard and blocks until all
    /// of them acknowledge.
    ///
    /// Returns `Ok(None)` when there was nothing to send. Only one round runs at a time;
    /// a concurrent caller waits for the round in flight to finish first.
    pub fn run_cache_round(&self) -> Result<Option<RoundSummary>> {
        let inner = &self.inner;
        let mut guard = self.state()?;
        while guard.classifier.round_in_flight() {
            inner.cache_acked.wait(&mut guard);
            if guard.shutdown {
                return Err(WeftError::Disconnected("coordinator".into()));
            }
        }

        let state = &mut *guard;
        let Some(update) = state.classifier.begin_round(&state.deletions) else {
            return Ok(None);
        };
        let message = Message::CacheUpdate(update);
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(err) => {
                if let Message::CacheUpdate(update) = message {
                    state.classifier.abandon_round(update);
                }
                return Err(err);
            }
        };
        for shard in 0..inner.num_shards {
            if let Err(err) = inner.transport.send(Endpoint::Shard(ShardId(shard)), frame.clone()) {
                // An unreachable shard holds no entries anyone can query.
                warn!(shard, error = %err, "coordinator.cache_round.send_failed");
                state.classifier.record_ack(&[]);
            }
        }

        let expected = inner.num_shards as usize;
        while guard.classifier.acks().is_some_and(|acks| acks < expected) {
            if guard.shutdown {
                return Err(WeftError::Disconnected("coordinator".into()));
            }
            inner.cache_acked.wait(&mut guard);
        }
        let state = &mut *guard;
        let summary = state.classifier.finish_round(&mut state.deletions);
        inner.cache_acked.notify_all();
        if let Some(summary) = &summary {
            debug!(
                generation = summary.generation,
                good = summary.good,
                bad = summary.bad,
                installed = summary.installed,
                activated = summary.activated,
                rejected = summary.rejected.len(),
                "coordinator.cache_round.complete"
            );
        }
        Ok(summary)
    }

    pub(super) fn record_cache_ack(&self, from: Endpoint, rejected: &[CacheId]) {
        let mut state = self.inner.state.lock();
        match state.classifier.record_ack(rejected) {
            Some(acks) if acks >= self.inner.num_shards as usize => {
                self.inner.cache_acked.notify_all();
            }
            Some(_) => {}
            None => debug!(%from, "coordinator.cache_round.stray_ack"),
        }
    }
}
