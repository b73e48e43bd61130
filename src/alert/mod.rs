//! Outbound alerts.
//!
//! - `AlertLimiter`: cooldown gate with atomic check-and-set
//! - `AlertTransport`: the opaque "send this image" collaborator
//! - `AlertDispatcher`: bounded queue plus a fixed pool of delivery workers,
//!   so a slow transport never stalls the pipeline loop

mod dispatcher;
mod limiter;
mod telegram;

use anyhow::Result;
use image::RgbImage;

use crate::session::AlertCredential;

pub use dispatcher::{AlertDispatcher, AlertJob, DispatchStats};
pub use limiter::{should_alert, AlertLimiter, DEFAULT_ALERT_COOLDOWN};
pub use telegram::{TelegramTransport, DEFAULT_API_BASE};

/// Delivers one alert. Errors are logged by the dispatcher and never retried.
pub trait AlertTransport: Send + Sync {
    fn name(&self) -> &'static str;

    fn send(&self, credential: &AlertCredential, image: &RgbImage, caption: &str) -> Result<()>;
}
