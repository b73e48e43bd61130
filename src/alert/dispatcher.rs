use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use super::AlertTransport;
use crate::error::GarudaError;
use crate::session::AlertCredential;

/// One queued alert: a private copy of the annotated frame.
pub struct AlertJob {
    pub credential: AlertCredential,
    pub image: RgbImage,
    pub caption: String,
    pub queued_at: Instant,
}

impl AlertJob {
    pub fn new(credential: AlertCredential, image: RgbImage, caption: impl Into<String>) -> Self {
        Self {
            credential,
            image,
            caption: caption.into(),
            queued_at: Instant::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub queued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Bounded alert queue drained by a fixed worker pool.
///
/// `dispatch` never blocks: a full queue drops the alert. Delivery outcomes
/// are logged and counted, never reported back to the caller.
pub struct AlertDispatcher {
    sender: Mutex<Option<Sender<AlertJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    transport_name: &'static str,
}

impl AlertDispatcher {
    pub fn new(
        transport: Arc<dyn AlertTransport>,
        workers: usize,
        queue_depth: usize,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(anyhow!("alert dispatcher needs at least one worker"));
        }
        let (sender, receiver) = crossbeam_channel::bounded::<AlertJob>(queue_depth.max(1));
        let counters = Arc::new(Counters::default());
        let transport_name = transport.name();

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let transport = transport.clone();
            let counters = counters.clone();
            let handle = std::thread::Builder::new()
                .name(format!("garuda-alert-{}", index))
                .spawn(move || alert_worker(receiver, transport, counters))
                .map_err(|err| anyhow!("failed to spawn alert worker: {}", err))?;
            handles.push(handle);
        }

        log::info!(
            "AlertDispatcher: {} worker(s), queue depth {}, transport {}",
            workers,
            queue_depth.max(1),
            transport_name
        );
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            counters,
            transport_name,
        })
    }

    /// Queue `job` for delivery. Returns whether it was accepted.
    pub fn dispatch(&self, job: AlertJob) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = sender.as_ref() else {
            log::warn!("AlertDispatcher: shut down; alert dropped");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match sender.try_send(job) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                log::info!("AlertDispatcher: alert queued ({} pending)", sender.len());
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("AlertDispatcher: queue full; alert dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!("AlertDispatcher: all workers exited; alert dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport_name
    }

    /// Close the queue, let workers drain what is already queued, and join
    /// them. Idempotent.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("AlertDispatcher: worker panicked");
            }
        }
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn alert_worker(
    receiver: Receiver<AlertJob>,
    transport: Arc<dyn AlertTransport>,
    counters: Arc<Counters>,
) {
    for job in receiver.iter() {
        let started = Instant::now();
        match transport.send(&job.credential, &job.image, &job.caption) {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "AlertDispatcher: alert delivered via {} in {:?} (queued {:?})",
                    transport.name(),
                    started.elapsed(),
                    started.duration_since(job.queued_at)
                );
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "AlertDispatcher: {}",
                    GarudaError::AlertDispatch(format!("{}: {:#}", transport.name(), err))
                );
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
