use std::path::Path;

use nagare::ControllerOptions;
use serde::Deserialize;

/// Contents of the `--config` file.
///
/// ```toml
/// headers = ["Referer: https://example.com/"]
///
/// [controller]
/// tick_interval_ms = 100
/// skip_failed_segments = true
///
/// [[controller.bases]]
/// transforms = [{ type = "host", host = "cdn2.example.com" }]
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub user_agent: Option<String>,
    pub headers: Vec<String>,
    pub controller: ControllerOptions,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = toml::from_str(&text)?;
        tracing::debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }
}
