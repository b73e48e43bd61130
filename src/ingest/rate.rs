//! Frame-rate governance math shared by the acquisition loop and sessions.

use std::time::Duration;

pub const DEFAULT_NATIVE_FPS: f64 = 30.0;
pub const DEFAULT_PLAYBACK_SPEED: f64 = 1.0;
pub const DEFAULT_TARGET_FPS: f64 = 15.0;
pub const MIN_PLAYBACK_SPEED: f64 = 0.1;
pub const MAX_PLAYBACK_SPEED: f64 = 10.0;
pub const MIN_TARGET_FPS: f64 = 1.0;
pub const MAX_TARGET_FPS: f64 = 30.0;

pub fn clamp_playback_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return DEFAULT_PLAYBACK_SPEED;
    }
    speed.clamp(MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED)
}

pub fn clamp_target_fps(fps: f64) -> f64 {
    if fps.is_nan() {
        return DEFAULT_TARGET_FPS;
    }
    fps.clamp(MIN_TARGET_FPS, MAX_TARGET_FPS)
}

/// Native rate reported by a backend, or 30 when it is unknown or bogus.
pub fn resolve_native_fps(reported: Option<f64>) -> f64 {
    match reported {
        Some(fps) if fps.is_finite() && fps > 0.0 => fps,
        _ => DEFAULT_NATIVE_FPS,
    }
}

/// Publish every Nth decoded frame when the source outpaces the target.
pub fn frame_skip_stride(native_fps: f64, target_fps: f64) -> u64 {
    if native_fps > target_fps {
        ((native_fps / target_fps).floor() as u64).max(1)
    } else {
        1
    }
}

/// Sleep after each publish: `1 / (native * speed)`, speed clamped first.
pub fn inter_frame_delay(native_fps: f64, playback_speed: f64) -> Duration {
    let speed = clamp_playback_speed(playback_speed);
    Duration::from_secs_f64(1.0 / (native_fps * speed))
}

pub fn effective_fps(native_fps: f64, target_fps: f64) -> f64 {
    native_fps.min(target_fps)
}
