//! Background compactor
//!
//! A dedicated thread that runs a compaction pass on a fixed interval until
//! the store shuts it down. Pass failures are logged; the next tick tries
//! again.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::Result;
use crate::storage::StoreInner;

use super::merge;

/// Handle to the running compaction thread
pub struct Compactor {
    /// Dropping the sender is the shutdown signal
    shutdown_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Compactor {
    /// Spawn the compaction thread
    pub(crate) fn start(store: Arc<StoreInner>, interval: Duration) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("driftkv-compactor".to_string())
            .spawn(move || run(store, interval, shutdown_rx))?;

        tracing::debug!(interval_ms = interval.as_millis() as u64, "Started compactor");

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread, letting an in-flight pass finish
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        drop(self.shutdown_tx.take());

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Compactor thread panicked");
            }
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(store: Arc<StoreInner>, interval: Duration, shutdown: Receiver<()>) {
    let ticker = channel::tick(interval);

    loop {
        crossbeam::select! {
            recv(ticker) -> _ => {
                if let Err(e) = merge::run_pass(&store) {
                    tracing::warn!(error = %e, "Compaction pass failed");
                }
            }
            recv(shutdown) -> _ => break,
        }
    }

    tracing::debug!("Compactor stopped");
}
