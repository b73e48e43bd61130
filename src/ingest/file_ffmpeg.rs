//! Local video files decoded with FFmpeg.
//!
//! Frames are converted to packed RGB24. The end of the file is reported as a
//! decode error; the acquisition loop answers it with `rewind`.

use anyhow::{anyhow, bail, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;
use std::path::Path;

use super::{CaptureBackend, DecodedFrame};

pub(crate) struct FfmpegFile {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    native_fps: Option<f64>,
    position: u64,
    drained: bool,
}

impl FfmpegFile {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let display = path.display().to_string();
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open video file '{}' with ffmpeg", display))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", display))?;
        let stream_index = input_stream.index();
        let rate = f64::from(input_stream.avg_frame_rate());
        let native_fps = (rate.is_finite() && rate > 0.0).then_some(rate);

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FfmpegFile: opened {} ({}x{}, fps={:?})",
            display,
            decoder.width(),
            decoder.height(),
            native_fps
        );
        Ok(Self {
            path: display,
            input,
            stream_index,
            decoder,
            scaler,
            native_fps,
            position: 0,
            drained: false,
        })
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<DecodedFrame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let image = frame_to_image(&rgb_frame)?;
        let position = self.position;
        self.position += 1;
        Ok(DecodedFrame { image, position })
    }
}

impl CaptureBackend for FfmpegFile {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn native_fps(&self) -> Option<f64> {
        self.native_fps
    }

    fn is_finite(&self) -> bool {
        true
    }

    fn decode(&mut self) -> Result<DecodedFrame> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            // Frames left over from the previous packet come first.
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded);
            }
            if self.drained {
                bail!("end of file");
            }

            let mut next = None;
            for (stream, packet) in self.input.packets() {
                if stream.index() == self.stream_index {
                    next = Some(packet);
                    break;
                }
            }
            match next {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.drained = true;
                }
            }
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.input
            .seek(0, ..)
            .with_context(|| format!("seek to start of '{}'", self.path))?;
        self.decoder.flush();
        self.position = 0;
        self.drained = false;
        Ok(())
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than expected")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }
        pixels
    };

    RgbImage::from_raw(width, height, pixels).context("ffmpeg frame size mismatch")
}
