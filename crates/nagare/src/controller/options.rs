use std::time::Duration;

use serde::Deserialize;

use crate::net::{BaseConfig, BaseOptions};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerOptions {
    pub tick_interval_ms: u64,
    pub request_timeout_secs: f64,

    /// How many times a failed manifest load is retried before giving up.
    pub manifest_retries: u32,
    pub manifest_retry_delay_ms: u64,

    /// Overrides `MPD@minBufferTime`.
    pub min_buffer_time_secs: Option<f64>,

    /// Keep loading after a segment failed on every base instead of stalling.
    pub skip_failed_segments: bool,

    /// Correct the wall clock with the manifest's `UTCTiming` before
    /// computing the live edge.
    pub sync_clock: bool,

    pub bases: Vec<BaseConfig>,
    pub base: BaseOptions,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            request_timeout_secs: 10.0,
            manifest_retries: 3,
            manifest_retry_delay_ms: 500,
            min_buffer_time_secs: None,
            skip_failed_segments: false,
            sync_clock: true,
            bases: Vec::new(),
            base: BaseOptions::default(),
        }
    }
}

impl ControllerOptions {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout_secs.max(0.0))
    }

    pub fn manifest_retry_delay(&self) -> Duration {
        Duration::from_millis(self.manifest_retry_delay_ms)
    }
}
