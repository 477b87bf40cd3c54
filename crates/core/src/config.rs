use thiserror::Error;

/// Errors raised while validating a [`FetchConfigBuilder`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("buf_size must be at least 1 byte")]
    BufSizeZero,
    #[error("world_size must be at least 1")]
    WorldSizeZero,
}

/// The configuration knobs the fetch core consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchConfig {
    /// I/O chunk size used by the File Copier and Container Reader.
    pub buf_size: usize,
    /// Whether to compute and enforce CRC32 during fetches.
    pub crc_on_flush: bool,
    /// The flow controller's sliding-window width, already clamped to
    /// `1..=max(1, world_size - 1)`.
    pub fetch_width: usize,
}

const DEFAULT_BUF_SIZE: usize = 1024 * 1024;

/// Builds a [`FetchConfig`], clamping `fetch_width` to the job's world
/// size once it is known.
#[derive(Debug, Clone, Default)]
pub struct FetchConfigBuilder {
    buf_size: Option<usize>,
    crc_on_flush: Option<bool>,
    fetch_width: Option<usize>,
}

impl FetchConfigBuilder {
    /// Starts a builder with every knob unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the I/O chunk size (default 1 MiB).
    pub fn buf_size(mut self, buf_size: usize) -> Self {
        self.buf_size = Some(buf_size);
        self
    }

    /// Overrides whether CRC32 is computed and enforced (default `true`).
    pub fn crc_on_flush(mut self, crc_on_flush: bool) -> Self {
        self.crc_on_flush = Some(crc_on_flush);
        self
    }

    /// Overrides the requested flow-controller window width (default
    /// `world_size - 1`, before clamping).
    pub fn fetch_width(mut self, fetch_width: usize) -> Self {
        self.fetch_width = Some(fetch_width);
        self
    }

    /// Validates and clamps every knob against `world_size`.
    pub fn build(self, world_size: usize) -> Result<FetchConfig, ConfigError> {
        if world_size == 0 {
            return Err(ConfigError::WorldSizeZero);
        }
        let buf_size = self.buf_size.unwrap_or(DEFAULT_BUF_SIZE);
        if buf_size == 0 {
            return Err(ConfigError::BufSizeZero);
        }
        let crc_on_flush = self.crc_on_flush.unwrap_or(true);
        let max_width = world_size.saturating_sub(1).max(1);
        let requested_width = self.fetch_width.unwrap_or(max_width);
        let fetch_width = requested_width.clamp(1, max_width);

        Ok(FetchConfig { buf_size, crc_on_flush, fetch_width })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = FetchConfigBuilder::new().build(5).unwrap();
        assert_eq!(config.buf_size, DEFAULT_BUF_SIZE);
        assert!(config.crc_on_flush);
        assert_eq!(config.fetch_width, 4);
    }

    #[test]
    fn fetch_width_clamps_above_world_size() {
        let config = FetchConfigBuilder::new().fetch_width(100).build(4).unwrap();
        assert_eq!(config.fetch_width, 3);
    }

    #[test]
    fn fetch_width_clamps_to_at_least_one_for_single_rank_world() {
        let config = FetchConfigBuilder::new().fetch_width(0).build(1).unwrap();
        assert_eq!(config.fetch_width, 1);
    }

    #[test]
    fn zero_buf_size_is_rejected() {
        let err = FetchConfigBuilder::new().buf_size(0).build(4).unwrap_err();
        assert_eq!(err, ConfigError::BufSizeZero);
    }

    #[test]
    fn zero_world_size_is_rejected() {
        let err = FetchConfigBuilder::new().build(0).unwrap_err();
        assert_eq!(err, ConfigError::WorldSizeZero);
    }
}
