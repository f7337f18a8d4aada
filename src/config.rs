//! Tunable constants referenced throughout the cache, echo, backfill, and
//! viewport modules, grouped into one struct with a `Default` impl so call
//! sites never hardcode a magic number twice — the same shape as the
//! teacher's `SyncConfig`.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerminalViewerConfig {
    pub max_history: usize,
    pub backfill_lookahead_rows: u64,
    pub backfill_gap_cap_rows: u64,
    pub prediction_ack_grace_ms: u64,
    pub srtt_alpha: f64,
    pub srtt_flag_threshold_ms: f64,
    pub glitch_trigger_threshold: u32,
    pub input_flush_delay_ms: u64,
    pub input_flush_max_bytes: usize,
    pub viewport_commit_debounce_ms: u64,
    pub viewport_commit_tolerance_rows: usize,
    pub enable_implicit_host_resize: bool,
}

impl Default for TerminalViewerConfig {
    fn default() -> Self {
        TerminalViewerConfig {
            max_history: 5000,
            backfill_lookahead_rows: 64,
            backfill_gap_cap_rows: 64,
            prediction_ack_grace_ms: 90,
            srtt_alpha: 0.125,
            srtt_flag_threshold_ms: 80.0,
            glitch_trigger_threshold: 10,
            input_flush_delay_ms: 2,
            input_flush_max_bytes: 32 * 1024,
            viewport_commit_debounce_ms: 120,
            viewport_commit_tolerance_rows: 1,
            enable_implicit_host_resize: false,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: i64 },
    #[error("{field} out of range [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
}

impl TerminalViewerConfig {
    /// Sanity-check the tunables a host embedder assembled by hand (e.g.
    /// from a config file), rather than trusting `Default`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_history == 0 {
            return Err(ConfigError::NotPositive {
                field: "max_history",
                value: 0,
            });
        }
        if self.backfill_gap_cap_rows == 0 {
            return Err(ConfigError::NotPositive {
                field: "backfill_gap_cap_rows",
                value: 0,
            });
        }
        if self.backfill_lookahead_rows > self.backfill_gap_cap_rows {
            return Err(ConfigError::OutOfRange {
                field: "backfill_lookahead_rows",
                value: self.backfill_lookahead_rows as i64,
                min: 0,
                max: self.backfill_gap_cap_rows as i64,
            });
        }
        if self.input_flush_max_bytes == 0 {
            return Err(ConfigError::NotPositive {
                field: "input_flush_max_bytes",
                value: 0,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn default_config_validates() {
        assert!(TerminalViewerConfig::default().validate().is_ok());
    }

    #[test_timeout::timeout]
    fn zero_max_history_rejected() {
        let mut config = TerminalViewerConfig::default();
        config.max_history = 0;
        assert!(config.validate().is_err());
    }

    #[test_timeout::timeout]
    fn lookahead_larger_than_cap_rejected() {
        let mut config = TerminalViewerConfig::default();
        config.backfill_lookahead_rows = config.backfill_gap_cap_rows + 1;
        assert!(config.validate().is_err());
    }
}
