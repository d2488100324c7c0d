use std::time::Duration;

use serde::Deserialize;

/// Streaming transformer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    /// Buffer tool-call argument deltas and flush them as a single
    /// fragment when the call's arguments are complete
    #[serde(default)]
    pub coalesce_tool_args: bool,
    /// Upper bound on how long a coalesced fragment may be held
    /// (e.g. "50ms", "1s")
    #[serde(default = "default_coalesce_window")]
    pub coalesce_window: String,
    /// Bounded capacity of the producer/consumer event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            coalesce_tool_args: false,
            coalesce_window: default_coalesce_window(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamConfig {
    /// Parse the coalescing window into a [`Duration`]
    ///
    /// # Errors
    ///
    /// Returns an error if the configured window is not a valid duration
    /// string
    pub fn coalesce_window_duration(&self) -> anyhow::Result<Duration> {
        duration_str::parse(&self.coalesce_window)
            .map_err(|e| anyhow::anyhow!("invalid coalesce_window '{}': {e}", self.coalesce_window))
    }

    /// Validate the streaming configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the window string is unparsable or the channel
    /// capacity is zero
    pub fn validate(&self) -> anyhow::Result<()> {
        self.coalesce_window_duration()?;
        if self.channel_capacity == 0 {
            anyhow::bail!("stream.channel_capacity must be greater than 0");
        }
        Ok(())
    }
}

fn default_coalesce_window() -> String {
    "100ms".to_owned()
}

const fn default_channel_capacity() -> usize {
    64
}
