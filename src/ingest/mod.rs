//! Frame acquisition.
//!
//! This module normalizes two source kinds behind `FrameSource`:
//! - Live cameras (endless; decode failures are transient and retried)
//! - Video files (finite; the end of the file loops back to the start)
//!
//! Backends:
//! - Synthetic `stub://` sources (tests, demos)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB/V4L2 cameras (feature: ingest-v4l2)
//!
//! `FrameSource` owns one background acquisition thread. That thread owns the
//! backend, so the device handle is released exactly when the thread exits.
//! Decoding runs at the source's pace; only every `frame_skip_stride`-th
//! decoded frame is published, and publishing is paced by the playback speed.

#[cfg(feature = "ingest-file-ffmpeg")]
mod file_ffmpeg;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod rate;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::{bail, Result};
use image::RgbImage;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::GarudaError;
use crate::frame::{Frame, FrameMailbox};
use crate::session::SourceRef;

pub use synthetic::stamped_position;

/// Log the first transient failure of a streak and every Nth after it.
const TRANSIENT_LOG_EVERY: u64 = 50;

/// One physical source. Owned by the acquisition thread.
pub trait CaptureBackend: Send {
    /// Human-readable source name for logs.
    fn describe(&self) -> String;

    /// Native frame rate, if the source can tell.
    fn native_fps(&self) -> Option<f64>;

    /// True for files (loop on failure), false for live devices (retry).
    fn is_finite(&self) -> bool;

    /// Decode the next frame. Any error means "no frame this cycle".
    fn decode(&mut self) -> Result<DecodedFrame>;

    /// Seek back to the first frame. Only called on finite sources.
    fn rewind(&mut self) -> Result<()>;
}

pub struct DecodedFrame {
    pub image: RgbImage,
    pub position: u64,
}

/// Process-level capture settings plus the session's rate knobs.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    /// Camera device template; `{index}` is replaced by the camera index.
    pub camera_device: String,
    /// Pause after a failed live decode.
    pub live_retry: Duration,
    pub playback_speed: f64,
    pub target_fps: f64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video{index}".to_string(),
            live_retry: Duration::from_millis(100),
            playback_speed: rate::DEFAULT_PLAYBACK_SPEED,
            target_fps: rate::DEFAULT_TARGET_FPS,
        }
    }
}

/// Open the backend for `source`.
pub fn open_backend(
    source: &SourceRef,
    settings: &CaptureSettings,
) -> Result<Box<dyn CaptureBackend>> {
    match source {
        SourceRef::Camera(index) => {
            let device = settings
                .camera_device
                .replace("{index}", &index.to_string());
            open_camera(&device)
        }
        SourceRef::File(path) => open_file(path),
    }
}

fn open_camera(device: &str) -> Result<Box<dyn CaptureBackend>> {
    if device.starts_with("stub://") {
        return Ok(Box::new(synthetic::SyntheticSource::open(device)?));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(v4l2::V4l2Camera::open(device)?))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        bail!(
            "camera capture of {} requires the ingest-v4l2 feature",
            device
        )
    }
}

fn open_file(path: &Path) -> Result<Box<dyn CaptureBackend>> {
    let display = path.to_string_lossy();
    if display.starts_with("stub://") {
        return Ok(Box::new(synthetic::SyntheticSource::open(&display)?));
    }
    if !path.is_file() {
        bail!("no such video file: {}", path.display());
    }
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(Box::new(file_ffmpeg::FfmpegFile::open(path)?))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        bail!("file ingestion requires the ingest-file-ffmpeg feature")
    }
}

/// Counters for one `FrameSource`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub decoded: u64,
    pub published: u64,
    pub rewinds: u64,
    pub transient_failures: u64,
    /// Frames published during the most recent completed file loop.
    pub last_cycle_published: Option<u64>,
    published_in_cycle: u64,
}

struct SourceShared {
    mailbox: FrameMailbox,
    stopped: AtomicBool,
    halt: Mutex<bool>,
    halt_signal: Condvar,
    stats: Mutex<SourceStats>,
}

impl SourceShared {
    fn new() -> Self {
        Self {
            mailbox: FrameMailbox::new(),
            stopped: AtomicBool::new(false),
            halt: Mutex::new(false),
            halt_signal: Condvar::new(),
            stats: Mutex::new(SourceStats::default()),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        *self.halt.lock().unwrap_or_else(|p| p.into_inner()) = true;
        self.halt_signal.notify_all();
        // Wake any reader blocked in `read()` so it can observe the stop.
        self.mailbox.close();
    }

    /// Sleep for `duration` unless stopped first. Returns false when stopped.
    fn pause(&self, duration: Duration) -> bool {
        let guard = self.halt.lock().unwrap_or_else(|p| p.into_inner());
        let (guard, _) = self
            .halt_signal
            .wait_timeout_while(guard, duration, |halted| !*halted)
            .unwrap_or_else(|p| p.into_inner());
        !*guard
    }

    fn stats(&self) -> MutexGuard<'_, SourceStats> {
        self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Stops a `FrameSource` from another thread without joining it.
#[derive(Clone)]
pub struct SourceStopper {
    shared: Arc<SourceShared>,
}

impl SourceStopper {
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }
}

#[derive(Clone, Copy, Debug)]
struct AcquisitionPlan {
    finite: bool,
    stride: u64,
    delay: Duration,
    live_retry: Duration,
}

/// Background-acquired frame source with frame-rate governance.
pub struct FrameSource {
    shared: Arc<SourceShared>,
    acquisition: Option<JoinHandle<()>>,
    description: String,
    native_fps: f64,
    target_fps: f64,
    plan: AcquisitionPlan,
}

impl FrameSource {
    /// Open `source` and start acquiring.
    pub fn open(source: &SourceRef, settings: &CaptureSettings) -> Result<Self, GarudaError> {
        let backend = open_backend(source, settings).map_err(|err| {
            log::error!("FrameSource: cannot open {}: {:#}", source, err);
            GarudaError::source_unavailable(source, &err)
        })?;
        Self::from_backend(backend, settings)
    }

    /// Start acquiring from an already opened backend.
    pub fn from_backend(
        backend: Box<dyn CaptureBackend>,
        settings: &CaptureSettings,
    ) -> Result<Self, GarudaError> {
        let description = backend.describe();
        let native_fps = rate::resolve_native_fps(backend.native_fps());
        let target_fps = rate::clamp_target_fps(settings.target_fps);
        let plan = AcquisitionPlan {
            finite: backend.is_finite(),
            stride: rate::frame_skip_stride(native_fps, target_fps),
            delay: rate::inter_frame_delay(native_fps, settings.playback_speed),
            live_retry: settings.live_retry,
        };

        let shared = Arc::new(SourceShared::new());
        let thread_shared = shared.clone();
        let acquisition = std::thread::Builder::new()
            .name("garuda-acquire".to_string())
            .spawn(move || acquisition_loop(backend, thread_shared, plan))
            .map_err(|err| GarudaError::SourceUnavailable {
                source_ref: description.clone(),
                reason: format!("failed to spawn acquisition thread: {}", err),
            })?;

        log::info!(
            "FrameSource: {} native_fps={:.2} target_fps={:.2} stride={} delay={:?} finite={}",
            description,
            native_fps,
            target_fps,
            plan.stride,
            plan.delay,
            plan.finite
        );

        Ok(Self {
            shared,
            acquisition: Some(acquisition),
            description,
            native_fps,
            target_fps,
            plan,
        })
    }

    /// Block until a new frame is published and return a private copy.
    ///
    /// Returns `None` once the source is stopped, including when the stop
    /// happens while this call is waiting.
    pub fn read(&self) -> Option<Frame> {
        self.shared.mailbox.read()
    }

    /// Like `read`, but returns `None` if nothing arrives within `timeout`.
    pub fn read_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.shared.mailbox.read_timeout(timeout)
    }

    /// Stop acquiring, wake blocked readers and release the device. Idempotent.
    pub fn stop(&mut self) {
        self.shared.stop();
        if let Some(handle) = self.acquisition.take() {
            if handle.join().is_err() {
                log::error!("FrameSource: acquisition thread for {} panicked", self.description);
            }
        }
    }

    pub fn stopper(&self) -> SourceStopper {
        SourceStopper {
            shared: self.shared.clone(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_finite(&self) -> bool {
        self.plan.finite
    }

    pub fn native_fps(&self) -> f64 {
        self.native_fps
    }

    pub fn effective_fps(&self) -> f64 {
        rate::effective_fps(self.native_fps, self.target_fps)
    }

    pub fn frame_skip_stride(&self) -> u64 {
        self.plan.stride
    }

    pub fn inter_frame_delay(&self) -> Duration {
        self.plan.delay
    }

    pub fn stats(&self) -> SourceStats {
        self.shared.stats().clone()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn acquisition_loop(
    mut backend: Box<dyn CaptureBackend>,
    shared: Arc<SourceShared>,
    plan: AcquisitionPlan,
) {
    let description = backend.describe();
    let mut decoded: u64 = 0;
    let mut decoded_since_rewind: u64 = 0;
    let mut failure_streak: u64 = 0;

    log::debug!("FrameSource: acquisition started for {}", description);
    while !shared.is_stopped() {
        let decoded_frame = match backend.decode() {
            Ok(frame) => frame,
            Err(err) if plan.finite => {
                // An empty or unreadable file would otherwise spin on rewind.
                if decoded_since_rewind == 0 && !shared.pause(plan.live_retry) {
                    break;
                }
                {
                    let mut stats = shared.stats();
                    stats.rewinds += 1;
                    stats.last_cycle_published = Some(stats.published_in_cycle);
                    stats.published_in_cycle = 0;
                }
                log::debug!("FrameSource: {} looping back ({:#})", description, err);
                if let Err(err) = backend.rewind() {
                    log::warn!("FrameSource: rewind of {} failed: {:#}", description, err);
                }
                decoded_since_rewind = 0;
                continue;
            }
            Err(err) => {
                failure_streak += 1;
                shared.stats().transient_failures += 1;
                if failure_streak == 1 || failure_streak % TRANSIENT_LOG_EVERY == 0 {
                    log::warn!(
                        "FrameSource: {} ({} in a row)",
                        GarudaError::TransientAcquisition(format!("{}: {:#}", description, err)),
                        failure_streak
                    );
                }
                if !shared.pause(plan.live_retry) {
                    break;
                }
                continue;
            }
        };
        failure_streak = 0;
        decoded += 1;
        decoded_since_rewind += 1;
        shared.stats().decoded = decoded;

        if decoded % plan.stride != 0 {
            continue;
        }

        let frame = Frame::new(decoded_frame.image, decoded, decoded_frame.position);
        if !shared.mailbox.publish(frame) {
            break;
        }
        {
            let mut stats = shared.stats();
            stats.published += 1;
            stats.published_in_cycle += 1;
        }

        if !shared.pause(plan.delay) {
            break;
        }
    }

    let stats = shared.stats().clone();
    log::info!(
        "FrameSource: acquisition for {} exited (decoded={} published={} rewinds={} transient_failures={})",
        description,
        stats.decoded,
        stats.published,
        stats.rewinds,
        stats.transient_failures
    );
    // `backend` drops here, releasing the device or file handle.
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
