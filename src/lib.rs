//! Garuda Watch
//!
//! This crate implements a single-session, real-time surveillance pipeline:
//! frames are acquired from a live camera or a looping video file, object
//! detection runs on a cadence decoupled from capture, annotated frames are
//! streamed to viewers, and rate-limited alerts are sent when the target class
//! shows up inside the configured daily time window.
//!
//! # Architecture
//!
//! Data flows leaves-first:
//!
//! 1. `ingest::FrameSource`: background acquisition thread, single-slot
//!    latest-wins mailbox, frame-skip and playback-speed governance.
//! 2. `pipeline::gate`: time-of-day window check (fails closed).
//! 3. `pipeline::schedule`: detection cadence (every Nth consumed frame).
//! 4. `alert`: cooldown limiter plus a bounded dispatch worker pool.
//! 5. `pipeline::PipelineLoop`: the orchestrating loop, paced to the target
//!    output rate and stopped cooperatively.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and the `FrameMailbox` handoff
//! - `ingest`: capture backends and `FrameSource`
//! - `detect`: detector backends (opaque image → detections)
//! - `annotate`: resize, overlays, JPEG encoding
//! - `alert`: limiter, dispatcher, transports
//! - `stream`: multiplexing emitted frames to viewers
//! - `pipeline`: gate, scheduler, governor, loop
//! - `control`: the session object behind start/stop/status/stream
//! - `api`: thin HTTP adapter over `control`

pub mod alert;
pub mod annotate;
pub mod api;
pub mod config;
pub mod control;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod session;
pub mod stream;

pub use alert::{AlertDispatcher, AlertJob, AlertLimiter, AlertTransport, TelegramTransport};
pub use config::GarudaConfig;
pub use control::Controller;
pub use api::{ApiHandle, ApiServer};
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectorBackend, SharedDetector, StubBackend,
};
pub use error::GarudaError;
pub use frame::{Frame, FrameMailbox};
pub use ingest::{CaptureSettings, FrameSource, SourceStats, SourceStopper};
pub use pipeline::{
    Clock, Collaborators, DetectionScheduler, FixedClock, FrameSink, LoopReport, PipelineLoop, PipelineTuning,
    SystemClock, TimeWindowGate,
};
pub use session::{
    ActiveWindow, AlertCredential, InputKind, SessionConfig, SourceRef, StartRequest,
    StartResponse, StatusSnapshot, StopResponse,
};
pub use stream::{FrameStream, StreamHub};
