//! Multiplexing emitted frames to any number of viewers.
//!
//! The pipeline loop pushes encoded JPEGs into a `StreamHub`; every viewer
//! holds a `FrameStream` that yields multipart chunks as frames arrive. Like
//! the frame mailbox, the hub keeps only the latest frame: a slow viewer
//! skips frames instead of building a backlog.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::pipeline::FrameSink;

pub const MULTIPART_BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap one JPEG as a multipart chunk.
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", MULTIPART_BOUNDARY);
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

#[derive(Default)]
struct HubState {
    latest: Option<Arc<Vec<u8>>>,
    sequence: u64,
    live: bool,
}

pub struct StreamHub {
    state: Mutex<HubState>,
    changed: Condvar,
    placeholder: Arc<Vec<u8>>,
}

impl StreamHub {
    pub fn new(placeholder_jpeg: Vec<u8>) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            changed: Condvar::new(),
            placeholder: Arc::new(placeholder_jpeg),
        }
    }

    /// A session started: viewers connecting from now on get a live stream.
    pub fn open_session(&self) {
        let mut state = self.lock();
        state.live = true;
        state.latest = None;
    }

    /// The session ended: every live stream finishes after its current chunk.
    pub fn close_session(&self) {
        let mut state = self.lock();
        state.live = false;
        state.latest = None;
        drop(state);
        self.changed.notify_all();
    }

    pub fn is_live(&self) -> bool {
        self.lock().live
    }

    pub fn placeholder(&self) -> Arc<Vec<u8>> {
        self.placeholder.clone()
    }

    /// Frames emitted since the hub was created.
    pub fn sequence(&self) -> u64 {
        self.lock().sequence
    }

    pub fn latest(&self) -> Option<Arc<Vec<u8>>> {
        self.lock().latest.clone()
    }

    /// Lazy sequence of multipart chunks, one per emitted frame, for as long
    /// as the current session runs. While idle it yields the placeholder once.
    pub fn subscribe(self: &Arc<Self>) -> FrameStream {
        let live = self.is_live();
        FrameStream {
            hub: self.clone(),
            last_seen: 0,
            mode: if live {
                StreamMode::Live
            } else {
                StreamMode::Placeholder
            },
        }
    }

    fn publish(&self, jpeg: Arc<Vec<u8>>) {
        let mut state = self.lock();
        state.latest = Some(jpeg);
        state.sequence += 1;
        drop(state);
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrameSink for StreamHub {
    fn emit(&self, jpeg: Vec<u8>) {
        self.publish(Arc::new(jpeg));
    }

    fn emit_placeholder(&self) {
        self.publish(self.placeholder.clone());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamMode {
    Placeholder,
    Live,
    Done,
}

/// One viewer's view of the hub.
pub struct FrameStream {
    hub: Arc<StreamHub>,
    last_seen: u64,
    mode: StreamMode,
}

impl FrameStream {
    pub fn is_live(&self) -> bool {
        self.mode == StreamMode::Live
    }
}

impl Iterator for FrameStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        match self.mode {
            StreamMode::Done => None,
            StreamMode::Placeholder => {
                self.mode = StreamMode::Done;
                Some(multipart_chunk(&self.hub.placeholder))
            }
            StreamMode::Live => {
                let mut state = self.hub.lock();
                loop {
                    if !state.live {
                        self.mode = StreamMode::Done;
                        return None;
                    }
                    if state.sequence > self.last_seen {
                        if let Some(jpeg) = state.latest.clone() {
                            self.last_seen = state.sequence;
                            drop(state);
                            return Some(multipart_chunk(&jpeg));
                        }
                    }
                    state = self
                        .hub
                        .changed
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
