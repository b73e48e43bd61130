//! Frames and the acquisition → consumer handoff.
//!
//! - `Frame`: an owned RGB8 image plus where it came from. Sharing a frame
//!   means cloning it; the acquisition thread and the consumer never alias
//!   the same buffer.
//! - `FrameMailbox`: single-slot, latest-wins handoff. A publish overwrites
//!   whatever is in the slot and wakes one waiting reader. Publishes with no
//!   reader waiting collapse into the latest frame; there is no backlog.

use image::RgbImage;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const RGB_CHANNELS: u8 = 3;

#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Decode counter value at publish time (monotonic per source).
    pub sequence: u64,
    /// Frame index inside the source since the last rewind (files) or open.
    pub position: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64, position: u64) -> Self {
        Self {
            image,
            sequence,
            position,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        RGB_CHANNELS
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    fresh: bool,
    closed: bool,
}

/// Latest-wins, no backlog.
#[derive(Default)]
pub struct FrameMailbox {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a copy of `frame` and raise the new-frame notification.
    ///
    /// Returns `false` once the mailbox is closed; the frame is dropped.
    pub fn publish(&self, frame: Frame) -> bool {
        let mut slot = self.lock();
        if slot.closed {
            return false;
        }
        slot.frame = Some(frame);
        slot.fresh = true;
        drop(slot);
        self.ready.notify_one();
        true
    }

    /// Block until a new frame is published, then return a copy of it and
    /// clear the notification. Returns `None` once the mailbox is closed.
    pub fn read(&self) -> Option<Frame> {
        let mut slot = self.lock();
        while !slot.fresh && !slot.closed {
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        Self::take_fresh(&mut slot)
    }

    /// Like `read`, but gives up after `timeout` and returns `None`.
    pub fn read_timeout(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        while !slot.fresh && !slot.closed {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot = guard;
        }
        Self::take_fresh(&mut slot)
    }

    /// Close the mailbox and wake every waiting reader.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn take_fresh(slot: &mut Slot) -> Option<Frame> {
        if slot.closed {
            return None;
        }
        slot.fresh = false;
        slot.frame.clone()
    }

    // The slot only holds plain data, so a panic elsewhere cannot leave it
    // half-written; recover instead of propagating the poison.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::Arc;
    use std::thread;

    fn make_frame(sequence: u64, value: u8) -> Frame {
        Frame::new(RgbImage::from_pixel(4, 2, Rgb([value; 3])), sequence, sequence)
    }

    #[test]
    fn frame_reports_dimensions() {
        let frame = make_frame(1, 0);
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.channels(), 3);
    }

    #[test]
    fn read_returns_copy_not_alias() {
        let mailbox = FrameMailbox::new();
        mailbox.publish(make_frame(1, 10));

        let mut first = mailbox.read_timeout(Duration::from_millis(10)).unwrap();
        first.image_mut().put_pixel(0, 0, Rgb([255, 0, 0]));

        mailbox.publish(make_frame(2, 10));
        let second = mailbox.read_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(second.image().get_pixel(0, 0), &Rgb([10, 10, 10]));
    }

    #[test]
    fn publishes_collapse_to_latest() {
        let mailbox = FrameMailbox::new();
        for seq in 1..=5 {
            mailbox.publish(make_frame(seq, seq as u8));
        }

        let frame = mailbox.read_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(frame.sequence, 5);

        // Notification was consumed; nothing is queued behind it.
        assert!(mailbox.read_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn blocked_reader_is_woken_by_publish() {
        let mailbox = Arc::new(FrameMailbox::new());
        let reader = {
            let mailbox = mailbox.clone();
            thread::spawn(move || mailbox.read())
        };

        thread::sleep(Duration::from_millis(30));
        mailbox.publish(make_frame(7, 1));

        let frame = reader.join().unwrap().unwrap();
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn close_unblocks_reader_with_none() {
        let mailbox = Arc::new(FrameMailbox::new());
        let reader = {
            let mailbox = mailbox.clone();
            thread::spawn(move || mailbox.read())
        };

        thread::sleep(Duration::from_millis(30));
        mailbox.close();

        assert!(reader.join().unwrap().is_none());
        assert!(!mailbox.publish(make_frame(1, 1)));
    }
}
