//! The orchestrating loop.
//!
//! One `PipelineLoop` runs per session on its own thread. Per iteration:
//! gate check, read the latest frame, resize, scheduled inference, overlays,
//! rate-limited alert, encode and emit, then pace to the target output rate.
//! The `running` flag is polled once per iteration; the current iteration is
//! never preempted.

pub mod gate;
pub mod pacing;
pub mod schedule;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::alert::{AlertDispatcher, AlertJob, AlertLimiter, DEFAULT_ALERT_COOLDOWN};
use crate::annotate::{draw_detection, draw_timestamp, encode_jpeg, resize_to_width};
use crate::detect::{Detection, SharedDetector};
use crate::error::GarudaError;
use crate::ingest::{FrameSource, SourceStats};
use crate::session::{AlertCredential, SessionConfig};

pub use gate::{Clock, FixedClock, SystemClock, TimeWindowGate};
pub use pacing::FrameGovernor;
pub use schedule::DetectionScheduler;

/// Where emitted frames go.
pub trait FrameSink: Send + Sync {
    /// One processed, encoded frame.
    fn emit(&self, jpeg: Vec<u8>);

    /// The loop went idle (outside the active window).
    fn emit_placeholder(&self);
}

/// Process-level knobs for the loop. Session knobs live in `SessionConfig`.
#[derive(Clone, Debug)]
pub struct PipelineTuning {
    pub inference_width: u32,
    pub target_class: usize,
    pub detection_stride: u64,
    pub jpeg_quality: u8,
    pub alert_caption: String,
    pub alert_cooldown: Duration,
    /// Gate re-check interval while outside the window.
    pub idle_poll: Duration,
    /// Longest single wait for a frame before re-checking the running flag.
    pub read_timeout: Duration,
    /// Pause after a read that produced nothing.
    pub retry_pause: Duration,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            inference_width: 640,
            target_class: crate::detect::classes::PERSON,
            detection_stride: schedule::DEFAULT_DETECTION_STRIDE,
            jpeg_quality: 80,
            alert_caption: "Person detected!".to_string(),
            alert_cooldown: DEFAULT_ALERT_COOLDOWN,
            idle_poll: Duration::from_secs(1),
            read_timeout: Duration::from_millis(500),
            retry_pause: Duration::from_millis(10),
        }
    }
}

/// The loop's external collaborators, shared across sessions.
#[derive(Clone)]
pub struct Collaborators {
    pub detector: SharedDetector,
    pub dispatcher: Arc<AlertDispatcher>,
    pub sink: Arc<dyn FrameSink>,
    pub clock: Arc<dyn Clock>,
}

/// Counters for one finished session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub frames: u64,
    pub inferences: u64,
    pub inference_failures: u64,
    pub detections: u64,
    pub alerts_queued: u64,
    pub alerts_dropped: u64,
    pub emitted: u64,
    pub idle_polls: u64,
    pub governor_overruns: u64,
    /// The source stopped while the session was still meant to run.
    pub source_lost: bool,
    pub source: SourceStats,
}

pub struct PipelineLoop {
    source: FrameSource,
    collaborators: Collaborators,
    credential: AlertCredential,
    gate: TimeWindowGate,
    scheduler: DetectionScheduler,
    governor: FrameGovernor,
    limiter: AlertLimiter,
    tuning: PipelineTuning,
    running: Arc<AtomicBool>,
}

impl PipelineLoop {
    pub fn new(
        session: &SessionConfig,
        source: FrameSource,
        collaborators: Collaborators,
        tuning: PipelineTuning,
        running: Arc<AtomicBool>,
    ) -> Self {
        if !session.credential.is_complete() {
            log::info!("PipelineLoop: alert credential incomplete; alerting disabled");
        }
        Self {
            source,
            credential: session.credential.clone(),
            gate: TimeWindowGate::new(&session.window),
            scheduler: DetectionScheduler::new(tuning.detection_stride),
            governor: FrameGovernor::new(session.target_fps),
            limiter: AlertLimiter::new(tuning.alert_cooldown),
            collaborators,
            tuning,
            running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run until the running flag clears or the source stops, then stop the
    /// source and return the session counters.
    pub fn run(mut self) -> LoopReport {
        let mut report = LoopReport::default();
        let mut frame_counter: u64 = 0;
        let mut idle = false;

        log::info!(
            "PipelineLoop: started on {} (stride {}, budget {:?})",
            self.source.description(),
            self.scheduler.stride(),
            self.governor.budget()
        );

        while self.is_running() {
            let time_of_day = self.collaborators.clock.time_of_day();
            if !self.gate.allows(time_of_day) {
                if !idle {
                    log::info!(
                        "PipelineLoop: {} outside active window; idle",
                        time_of_day.format("%H:%M:%S")
                    );
                    self.collaborators.sink.emit_placeholder();
                    idle = true;
                }
                report.idle_polls += 1;
                self.idle_sleep(self.tuning.idle_poll);
                continue;
            }
            if idle {
                log::info!(
                    "PipelineLoop: {} inside active window; live",
                    time_of_day.format("%H:%M:%S")
                );
                idle = false;
            }

            let iteration_start = Instant::now();
            let Some(frame) = self.source.read_timeout(self.tuning.read_timeout) else {
                if self.source.is_stopped() {
                    // A routine stop clears `running` before stopping the source.
                    if self.is_running() {
                        log::warn!("PipelineLoop: source stopped underneath the loop");
                        report.source_lost = true;
                    }
                    break;
                }
                std::thread::sleep(self.tuning.retry_pause);
                continue;
            };

            frame_counter += 1;
            report.frames += 1;
            // The full-resolution capture is dropped here; everything after
            // works on (and emits) the resized copy.
            let mut image = resize_to_width(frame.image(), self.tuning.inference_width);
            drop(frame);

            let mut detected = false;
            if self.scheduler.should_infer(frame_counter) {
                report.inferences += 1;
                match self.detect(&image) {
                    Ok(detections) => {
                        for detection in detections
                            .iter()
                            .filter(|d| d.class_id == self.tuning.target_class)
                        {
                            draw_detection(&mut image, detection);
                            report.detections += 1;
                            detected = true;
                        }
                    }
                    Err(err) => {
                        report.inference_failures += 1;
                        log::warn!("PipelineLoop: frame {}: {}", frame_counter, err);
                    }
                }
            }

            draw_timestamp(&mut image, self.collaborators.clock.time_of_day());

            if detected && self.credential.is_complete() {
                self.maybe_alert(&image, &mut report);
            }

            match encode_jpeg(&image, self.tuning.jpeg_quality) {
                Ok(jpeg) => {
                    self.collaborators.sink.emit(jpeg);
                    report.emitted += 1;
                }
                Err(err) => log::warn!("PipelineLoop: frame {} not emitted: {:#}", frame_counter, err),
            }

            self.governor.pace(iteration_start);
        }

        self.source.stop();
        report.source = self.source.stats();
        report.governor_overruns = self.governor.overruns();
        log::info!(
            "PipelineLoop: stopped (frames={} inferences={} detections={} alerts={} inference_failures={})",
            report.frames,
            report.inferences,
            report.detections,
            report.alerts_queued,
            report.inference_failures
        );
        report
    }

    /// A detector error or panic is confined to this call. The detector is
    /// shared across sessions, so a poisoned lock is recovered rather than
    /// failing every later inference.
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, GarudaError> {
        let mut detector = self
            .collaborators
            .detector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(image))) {
            Ok(result) => result.map_err(|err| GarudaError::Inference(format!("{:#}", err))),
            Err(payload) => Err(GarudaError::Inference(format!(
                "detector {} panicked: {}",
                detector.name(),
                panic_message(payload.as_ref())
            ))),
        }
    }

    fn maybe_alert(&self, image: &RgbImage, report: &mut LoopReport) {
        let now = self.collaborators.clock.now();
        if !self.limiter.try_acquire(now) {
            return;
        }
        // The worker gets its own copy; the loop keeps encoding this one.
        let job = AlertJob::new(
            self.credential.clone(),
            image.clone(),
            self.tuning.alert_caption.clone(),
        );
        if self.collaborators.dispatcher.dispatch(job) {
            report.alerts_queued += 1;
        } else {
            report.alerts_dropped += 1;
        }
    }

    /// Coarse idle wait that still notices a stop within a short slice.
    fn idle_sleep(&self, total: Duration) {
        const SLICE: Duration = Duration::from_millis(50);
        let deadline = Instant::now() + total;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(SLICE));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
