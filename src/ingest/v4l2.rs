//! Live V4L2 cameras (e.g. /dev/video0).
//!
//! The device is asked for RGB3; drivers that refuse fall back to whatever
//! they negotiate, and YUYV/NV12 buffers are converted in `normalize`.

use anyhow::{bail, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureBackend, DecodedFrame};

const PREFERRED_WIDTH: u32 = 640;
const PREFERRED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[self_referencing]
struct CameraStream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub(crate) struct V4l2Camera {
    path: String,
    state: CameraStream,
    width: u32,
    height: u32,
    format: PixelFormat,
    native_fps: Option<f64>,
    position: u64,
}

impl V4l2Camera {
    pub(crate) fn open(path: &str) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = PREFERRED_WIDTH;
        format.height = PREFERRED_HEIGHT;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = match &format.fourcc.repr {
            b"RGB3" => PixelFormat::Rgb24,
            b"YUYV" => PixelFormat::Yuyv,
            b"NV12" => PixelFormat::Nv12,
            other => bail!(
                "v4l2 device {} negotiated unsupported format {}",
                path,
                String::from_utf8_lossy(other)
            ),
        };

        let native_fps = device.params().ok().and_then(|params| {
            let interval = params.interval;
            (interval.numerator > 0 && interval.denominator > 0)
                .then(|| interval.denominator as f64 / interval.numerator as f64)
        });

        let state = CameraStreamBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Camera: opened {} ({}x{} {:?}, fps={:?})",
            path,
            format.width,
            format.height,
            pixel_format,
            native_fps
        );
        Ok(Self {
            path: path.to_string(),
            state,
            width: format.width,
            height: format.height,
            format: pixel_format,
            native_fps,
            position: 0,
        })
    }
}

impl CaptureBackend for V4l2Camera {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn native_fps(&self) -> Option<f64> {
        self.native_fps
    }

    fn is_finite(&self) -> bool {
        false
    }

    fn decode(&mut self) -> Result<DecodedFrame> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.width, self.height, self.format);
        let image = self.state.with_mut(|fields| -> Result<_> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, format)
        })?;

        let position = self.position;
        self.position += 1;
        Ok(DecodedFrame { image, position })
    }

    fn rewind(&mut self) -> Result<()> {
        bail!("live camera {} cannot rewind", self.path)
    }
}
