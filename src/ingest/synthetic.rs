//! Synthetic capture backends (`stub://`) for tests and demos.
//!
//! - `stub://clip?fps=30&frames=150`: finite clip, fails once at the end so the
//!   acquisition loop has to rewind.
//! - `stub://camera?fps=30`: endless live camera paced at its native rate.
//! - `stub://unavailable`: refuses to open.
//!
//! Optional parameters: `width`, `height` (default 640x480), `fail_every=N`
//! (every Nth decode fails, simulating a busy device).
//!
//! Frame content is a deterministic function of the clip position, with the
//! position itself written into the first pixel row so tests can read it back.

use anyhow::{anyhow, bail, Context, Result};
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};
use url::Url;

use super::rate::resolve_native_fps;
use super::{CaptureBackend, DecodedFrame};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_CLIP_FRAMES: u64 = 150;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyntheticKind {
    Clip { frames: u64 },
    Camera,
}

pub(crate) struct SyntheticSource {
    uri: String,
    kind: SyntheticKind,
    native_fps: Option<f64>,
    width: u32,
    height: u32,
    fail_every: u64,
    position: u64,
    decode_calls: u64,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub(crate) fn open(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).with_context(|| format!("parse synthetic source '{}'", uri))?;
        if url.scheme() != "stub" {
            bail!("synthetic sources use the stub:// scheme, got '{}'", uri);
        }

        let mut fps = None;
        let mut frames = DEFAULT_CLIP_FRAMES;
        let mut width = DEFAULT_WIDTH;
        let mut height = DEFAULT_HEIGHT;
        let mut fail_every = 0;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "fps" => fps = Some(parse_param::<f64>(&key, &value)?),
                "frames" => frames = parse_param(&key, &value)?,
                "width" => width = parse_param(&key, &value)?,
                "height" => height = parse_param(&key, &value)?,
                "fail_every" => fail_every = parse_param(&key, &value)?,
                other => log::warn!("SyntheticSource: ignoring unknown parameter '{}'", other),
            }
        }
        if width == 0 || height == 0 {
            bail!("synthetic frame size must be non-zero");
        }

        let kind = match url.host_str() {
            Some("clip") => {
                if frames == 0 {
                    bail!("synthetic clip must contain at least one frame");
                }
                SyntheticKind::Clip { frames }
            }
            Some("camera") => SyntheticKind::Camera,
            Some("unavailable") => bail!("synthetic device refused to open"),
            other => bail!("unknown synthetic source '{}'", other.unwrap_or("")),
        };

        log::info!("SyntheticSource: opened {} ({}x{})", uri, width, height);
        Ok(Self {
            uri: uri.to_string(),
            kind,
            native_fps: fps,
            width,
            height,
            fail_every,
            position: 0,
            decode_calls: 0,
            next_due: None,
        })
    }

    fn render(&self, position: u64) -> RgbImage {
        let mut image = RgbImage::from_fn(self.width, self.height, |x, y| {
            let base = (x as u64 + y as u64 * 3 + position * 7) % 256;
            Rgb([base as u8, (base as u8).wrapping_mul(3), (position % 256) as u8])
        });
        // Stamp the position into the first row, one byte per pixel.
        for (i, byte) in position.to_le_bytes().iter().enumerate() {
            if (i as u32) < self.width {
                image.put_pixel(i as u32, 0, Rgb([*byte, *byte, *byte]));
            }
        }
        image
    }

    fn pace_live(&mut self) {
        let fps = resolve_native_fps(self.native_fps);
        let interval = Duration::from_secs_f64(1.0 / fps);
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);
    }
}

impl CaptureBackend for SyntheticSource {
    fn describe(&self) -> String {
        self.uri.clone()
    }

    fn native_fps(&self) -> Option<f64> {
        self.native_fps
    }

    fn is_finite(&self) -> bool {
        matches!(self.kind, SyntheticKind::Clip { .. })
    }

    fn decode(&mut self) -> Result<DecodedFrame> {
        self.decode_calls += 1;
        if self.kind == SyntheticKind::Camera {
            self.pace_live();
        }
        if self.fail_every > 0 && self.decode_calls % self.fail_every == 0 {
            return Err(anyhow!("synthetic device busy"));
        }
        if let SyntheticKind::Clip { frames } = self.kind {
            if self.position >= frames {
                return Err(anyhow!("end of clip"));
            }
        }
        let position = self.position;
        self.position += 1;
        Ok(DecodedFrame {
            image: self.render(position),
            position,
        })
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}

/// Read back the position stamped by a synthetic backend.
pub fn stamped_position(image: &RgbImage) -> Option<u64> {
    if image.width() < 8 || image.height() == 0 {
        return None;
    }
    let mut bytes = [0u8; 8];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = image.get_pixel(i as u32, 0)[0];
    }
    Some(u64::from_le_bytes(bytes))
}

fn parse_param<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("invalid value '{}' for synthetic parameter '{}'", value, key))
}
