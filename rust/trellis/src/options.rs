use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_PLUGIN_TIMEOUT_MS: u64 = 10_000;

/// Application settings.
///
/// Deserializes from any serde format; missing fields take their defaults.
///
/// ```
/// use trellis::Options;
/// use std::time::Duration;
///
/// let options: Options = serde_json::from_str(r#"{ "plugin_timeout_ms": 0 }"#).unwrap();
/// assert_eq!(options.plugin_timeout(), None);
///
/// let options = Options::default().with_plugin_timeout(Duration::from_millis(250));
/// assert_eq!(options.plugin_timeout(), Some(Duration::from_millis(250)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// How long a plugin body may take before boot fails, in milliseconds.
    /// `0` disables the limit.
    pub plugin_timeout_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            plugin_timeout_ms: DEFAULT_PLUGIN_TIMEOUT_MS,
        }
    }
}

impl Options {
    /// Set the plugin timeout. A zero duration disables it.
    pub fn with_plugin_timeout(mut self, timeout: Duration) -> Self {
        self.plugin_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// The plugin timeout, `None` when disabled.
    pub fn plugin_timeout(&self) -> Option<Duration> {
        match self.plugin_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
