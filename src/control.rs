//! The session object behind the control surface.
//!
//! `Controller` owns the single active session. Starting a session first
//! stops and joins the previous one, so its acquisition thread has released
//! the device before the new `FrameSource` opens it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::Result;

use crate::alert::AlertDispatcher;
use crate::config::GarudaConfig;
use crate::detect::SharedDetector;
use crate::error::GarudaError;
use crate::ingest::{FrameSource, SourceStopper};
use crate::pipeline::{Clock, Collaborators, LoopReport, PipelineLoop, PipelineTuning};
use crate::session::{SessionConfig, StartRequest, StartResponse, StatusSnapshot, StopResponse};
use crate::stream::{FrameStream, StreamHub};

struct ActiveSession {
    running: Arc<AtomicBool>,
    stopper: SourceStopper,
    thread: JoinHandle<LoopReport>,
}

impl ActiveSession {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.thread.is_finished()
    }

    fn signal_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stopper.stop();
    }
}

struct ControlState {
    config: SessionConfig,
    active: Option<ActiveSession>,
    last_report: Option<LoopReport>,
}

pub struct Controller {
    settings: GarudaConfig,
    tuning: PipelineTuning,
    collaborators: Collaborators,
    hub: Arc<StreamHub>,
    state: Mutex<ControlState>,
}

impl Controller {
    pub fn new(
        config: &GarudaConfig,
        detector: SharedDetector,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Result<Self> {
        let hub = Arc::new(StreamHub::new(config.placeholder_jpeg()?));
        Ok(Self {
            settings: config.clone(),
            tuning: config.pipeline_tuning(),
            collaborators: Collaborators {
                detector,
                dispatcher,
                sink: hub.clone(),
                clock: config.clock(),
            },
            hub,
            state: Mutex::new(ControlState {
                config: config.session.clone(),
                active: None,
                last_report: None,
            }),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.collaborators.clock = clock;
        self
    }

    pub fn with_tuning(mut self, tuning: PipelineTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn hub(&self) -> Arc<StreamHub> {
        self.hub.clone()
    }

    /// Replace the session configuration and start a new session.
    ///
    /// Only `SourceUnavailable` fails a start; numeric fields are clamped and
    /// reported in the response. The configuration is kept even when the
    /// source cannot be opened.
    pub fn start(&self, request: &StartRequest) -> Result<StartResponse, GarudaError> {
        let mut state = self.lock();
        if let Some(report) = self.finish_active(&mut state) {
            state.last_report = Some(report);
        }

        let (config, adjustments) = SessionConfig::from_request(request, &state.config);
        for adjustment in &adjustments {
            log::warn!("Controller: {}", adjustment);
        }
        state.config = config.clone();

        let capture = self.settings.capture_settings(&config);
        let source = FrameSource::open(&config.source, &capture).map_err(|err| {
            log::error!("Controller: start failed: {}", err);
            err
        })?;
        let stopper = source.stopper();
        let running = Arc::new(AtomicBool::new(true));

        self.hub.open_session();
        let pipeline = PipelineLoop::new(
            &config,
            source,
            self.collaborators.clone(),
            self.tuning.clone(),
            running.clone(),
        );
        let hub = self.hub.clone();
        let thread = std::thread::Builder::new()
            .name("garuda-pipeline".to_string())
            .spawn(move || {
                let report = pipeline.run();
                hub.close_session();
                report
            })
            .map_err(|err| {
                self.hub.close_session();
                GarudaError::SourceUnavailable {
                    source_ref: config.source.to_string(),
                    reason: format!("failed to spawn pipeline thread: {}", err),
                }
            })?;

        log::info!(
            "Controller: session started ({} window {}-{} speed {} fps {})",
            config.source,
            config.window.from,
            config.window.to,
            config.playback_speed,
            config.target_fps
        );
        state.active = Some(ActiveSession {
            running,
            stopper,
            thread,
        });

        Ok(StartResponse {
            status: "success",
            message: "Surveillance started".to_string(),
            adjustments: adjustments.iter().map(|a| a.to_string()).collect(),
        })
    }

    /// Ask the running session to stop. Returns without waiting; the loop
    /// exits at its next iteration boundary and the next start (or
    /// `shutdown`) joins it.
    pub fn stop(&self) -> StopResponse {
        let state = self.lock();
        let message = match &state.active {
            Some(active) if active.is_running() => {
                active.signal_stop();
                self.hub.close_session();
                log::info!("Controller: session stop requested");
                "Surveillance stopped"
            }
            _ => "Surveillance was not running",
        };
        StopResponse {
            status: "success",
            message: message.to_string(),
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.lock();
        let config = &state.config;
        StatusSnapshot {
            is_running: state.active.as_ref().is_some_and(ActiveSession::is_running),
            input_type: config.input_kind(),
            from_time: config.window.from.clone(),
            to_time: config.window.to.clone(),
            playback_speed: config.playback_speed,
            target_fps: config.target_fps,
        }
    }

    /// Multipart chunks for one viewer: live frames while a session runs,
    /// a single placeholder otherwise.
    pub fn stream_frames(&self) -> FrameStream {
        self.hub.subscribe()
    }

    /// Stop the running session (if any), wait for its loop and source to
    /// finish, and return its counters.
    pub fn stop_and_wait(&self) -> Option<LoopReport> {
        let mut state = self.lock();
        let report = self.finish_active(&mut state);
        if let Some(report) = &report {
            state.last_report = Some(report.clone());
        }
        report
    }

    /// Counters of the most recently finished session.
    pub fn last_report(&self) -> Option<LoopReport> {
        self.lock().last_report.clone()
    }

    /// Stop the session and the alert workers. Queued alerts are still sent.
    pub fn shutdown(&self) -> Option<LoopReport> {
        let report = self.stop_and_wait();
        self.collaborators.dispatcher.shutdown();
        log::info!("Controller: shut down");
        report
    }

    fn finish_active(&self, state: &mut ControlState) -> Option<LoopReport> {
        let active = state.active.take()?;
        active.signal_stop();
        self.hub.close_session();
        match active.thread.join() {
            Ok(report) => Some(report),
            Err(_) => {
                log::error!("Controller: pipeline thread panicked");
                None
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let mut state = self.lock();
        let _ = self.finish_active(&mut state);
    }
}
