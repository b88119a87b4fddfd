//! Allocator configuration.
//!
//! Defaults reproduce the classic malloc-lab setup: 4 KiB growth chunks, a
//! 20 MiB heap cap and the segregated best-fit strategy with the adaptive
//! exact-fit layer watching 80, 128 and 464 byte requests.
//!
//! Values can be overridden from the environment:
//! - `SEGALLOC_STRATEGY`: `first_fit`, `next_fit`, `best_fit_explicit` or
//!   `segregated_best_fit` (loose spelling accepted).
//! - `SEGALLOC_ADAPTIVE`: `1`/`true`/`on` or `0`/`false`/`off`.
//! - `SEGALLOC_WATCHED_SIZES`: comma-separated request sizes.
//! - `SEGALLOC_CHUNK_SIZE`, `SEGALLOC_MAX_HEAP`: byte counts.
//! - `SEGALLOC_LOG_LEVEL`: `trace`, `debug`, `info`, `warn` or `error`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::malloc::allocator::AllocatorLogLevel;
use crate::malloc::block::{self, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::malloc::heap::{DEFAULT_MAX_HEAP, FIRST_BLOCK};
use crate::malloc::strategy::StrategyKind;

/// Heap growth granularity (bytes).
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Request sizes watched by the adaptive policy unless configured.
pub const DEFAULT_WATCHED_SIZES: [usize; 3] = [80, 128, 464];

/// Upper bound on the number of watched sizes.
pub const MAX_WATCHED_SIZES: usize = 8;

/// Full allocator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Base fit strategy.
    pub strategy: StrategyKind,
    /// Wrap the base strategy in the adaptive exact-fit layer.
    pub adaptive: bool,
    /// Caller-facing request sizes the adaptive policy watches.
    pub watched_sizes: Vec<usize>,
    /// Total requests required before adaptive mode may activate.
    pub activation_requests: u64,
    /// Hits on one watched size required to activate (lower threshold).
    pub activation_hits: u64,
    /// Magazine capacity per watched size.
    pub exact_fit_capacity: usize,
    /// Split threshold for watched requests once adaptive; also the size
    /// window a released block may exceed a watched size by and still park.
    pub hot_split_threshold: usize,
    /// Adjusted sizes above this are carved from the tail of a split block.
    pub large_split_cutoff: usize,
    /// Minimum heap growth step.
    pub chunk_size: usize,
    /// Backing-store capacity.
    pub max_heap_bytes: usize,
    /// Lifecycle records below this level are not kept.
    pub log_level: AllocatorLogLevel,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::SegregatedBestFit,
            adaptive: true,
            watched_sizes: DEFAULT_WATCHED_SIZES.to_vec(),
            activation_requests: 40,
            activation_hits: 20,
            exact_fit_capacity: 64,
            hot_split_threshold: 32,
            large_split_cutoff: 256,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_heap_bytes: DEFAULT_MAX_HEAP,
            log_level: AllocatorLogLevel::Info,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

fn parse_bool_loose(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" | "enabled" => Some(true),
        "0" | "false" | "off" | "no" | "disabled" => Some(false),
        _ => None,
    }
}

fn parse_usize(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Parse {
        var,
        value: raw.to_string(),
    })
}

impl AllocatorConfig {
    /// Defaults with a different base strategy.
    #[must_use]
    pub fn with_strategy(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Rejects values the allocator cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size < MIN_BLOCK_SIZE
            || self.chunk_size % DSIZE != 0
            || self.chunk_size >= MAX_BLOCK_SIZE
        {
            return Err(invalid(
                "chunk_size",
                format!(
                    "{} must be a multiple of {DSIZE} in [{MIN_BLOCK_SIZE}, {MAX_BLOCK_SIZE})",
                    self.chunk_size
                ),
            ));
        }
        if self.max_heap_bytes > MAX_BLOCK_SIZE {
            return Err(invalid(
                "max_heap_bytes",
                format!(
                    "{} exceeds the largest encodable block size {MAX_BLOCK_SIZE}",
                    self.max_heap_bytes
                ),
            ));
        }
        if self.max_heap_bytes < FIRST_BLOCK + self.chunk_size {
            return Err(invalid(
                "max_heap_bytes",
                format!(
                    "{} cannot hold the sentinels plus one {}-byte chunk",
                    self.max_heap_bytes, self.chunk_size
                ),
            ));
        }
        if self.watched_sizes.len() > MAX_WATCHED_SIZES {
            return Err(invalid(
                "watched_sizes",
                format!("at most {MAX_WATCHED_SIZES} sizes may be watched"),
            ));
        }
        if let Some(&bad) = self
            .watched_sizes
            .iter()
            .find(|&&size| size == 0 || block::adjusted_size(size).is_none())
        {
            return Err(invalid("watched_sizes", format!("{bad} is not a valid request size")));
        }
        if self.activation_hits == 0 || self.activation_hits > self.activation_requests {
            return Err(invalid(
                "activation_hits",
                format!(
                    "{} must be in [1, activation_requests = {}]",
                    self.activation_hits, self.activation_requests
                ),
            ));
        }
        if self.exact_fit_capacity == 0 {
            return Err(invalid("exact_fit_capacity", "must be at least 1"));
        }
        if self.hot_split_threshold < MIN_BLOCK_SIZE || self.hot_split_threshold % DSIZE != 0 {
            return Err(invalid(
                "hot_split_threshold",
                format!(
                    "{} must be a multiple of {DSIZE} no smaller than {MIN_BLOCK_SIZE}",
                    self.hot_split_threshold
                ),
            ));
        }
        Ok(())
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through `lookup`, which maps variable names to
    /// values. The result is validated.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup("SEGALLOC_STRATEGY") {
            config.strategy =
                StrategyKind::from_str_loose(&raw).ok_or(ConfigError::UnknownStrategy(raw))?;
        }
        if let Some(raw) = lookup("SEGALLOC_ADAPTIVE") {
            config.adaptive = parse_bool_loose(&raw).ok_or(ConfigError::Parse {
                var: "SEGALLOC_ADAPTIVE",
                value: raw,
            })?;
        }
        if let Some(raw) = lookup("SEGALLOC_WATCHED_SIZES") {
            config.watched_sizes = raw
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| parse_usize("SEGALLOC_WATCHED_SIZES", part))
                .collect::<Result<_, _>>()?;
        }
        if let Some(raw) = lookup("SEGALLOC_CHUNK_SIZE") {
            config.chunk_size = parse_usize("SEGALLOC_CHUNK_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("SEGALLOC_MAX_HEAP") {
            config.max_heap_bytes = parse_usize("SEGALLOC_MAX_HEAP", &raw)?;
        }
        if let Some(raw) = lookup("SEGALLOC_LOG_LEVEL") {
            config.log_level =
                AllocatorLogLevel::from_str_loose(&raw).ok_or(ConfigError::UnknownLogLevel(raw))?;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_is_valid_segregated_adaptive() {
        let config = AllocatorConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.strategy, StrategyKind::SegregatedBestFit);
        assert!(config.adaptive);
        assert_eq!(config.watched_sizes, vec![80, 128, 464]);
        assert_eq!(config.chunk_size, 4096);
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = AllocatorConfig::from_env_with(env(&[])).unwrap();
        assert_eq!(config, AllocatorConfig::default());
    }

    #[test]
    fn environment_overrides_fields() {
        let config = AllocatorConfig::from_env_with(env(&[
            ("SEGALLOC_STRATEGY", "Next-Fit"),
            ("SEGALLOC_ADAPTIVE", "off"),
            ("SEGALLOC_WATCHED_SIZES", "24, 200"),
            ("SEGALLOC_CHUNK_SIZE", "8192"),
            ("SEGALLOC_MAX_HEAP", "1048576"),
            ("SEGALLOC_LOG_LEVEL", "TRACE"),
        ]))
        .unwrap();
        assert_eq!(config.strategy, StrategyKind::NextFit);
        assert!(!config.adaptive);
        assert_eq!(config.watched_sizes, vec![24, 200]);
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.max_heap_bytes, 1 << 20);
        assert_eq!(config.log_level, AllocatorLogLevel::Trace);
    }

    #[test]
    fn environment_errors_are_typed() {
        assert_eq!(
            AllocatorConfig::from_env_with(env(&[("SEGALLOC_STRATEGY", "buddy")])),
            Err(ConfigError::UnknownStrategy("buddy".into()))
        );
        assert!(matches!(
            AllocatorConfig::from_env_with(env(&[("SEGALLOC_CHUNK_SIZE", "lots")])),
            Err(ConfigError::Parse { var: "SEGALLOC_CHUNK_SIZE", .. })
        ));
        assert!(matches!(
            AllocatorConfig::from_env_with(env(&[("SEGALLOC_CHUNK_SIZE", "100")])),
            Err(ConfigError::InvalidValue { field: "chunk_size", .. })
        ));
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        let too_big = AllocatorConfig {
            max_heap_bytes: u32::MAX as usize + 1,
            ..AllocatorConfig::default()
        };
        assert!(too_big.validate().is_err());

        let largest = AllocatorConfig {
            max_heap_bytes: MAX_BLOCK_SIZE,
            ..AllocatorConfig::default()
        };
        assert!(largest.validate().is_ok());

        // Two freed neighbours in a bigger heap would coalesce past the
        // header's size range.
        let past_block_range = AllocatorConfig {
            max_heap_bytes: 1536 << 20,
            ..AllocatorConfig::default()
        };
        assert!(matches!(
            past_block_range.validate(),
            Err(ConfigError::InvalidValue { field: "max_heap_bytes", .. })
        ));

        let hits_above_total = AllocatorConfig {
            activation_requests: 10,
            activation_hits: 11,
            ..AllocatorConfig::default()
        };
        assert!(hits_above_total.validate().is_err());

        let zero_watch = AllocatorConfig {
            watched_sizes: vec![0],
            ..AllocatorConfig::default()
        };
        assert!(zero_watch.validate().is_err());

        let tiny_heap = AllocatorConfig {
            max_heap_bytes: 1024,
            ..AllocatorConfig::default()
        };
        assert!(tiny_heap.validate().is_err());
    }

    #[test]
    fn serde_round_trip_with_partial_input() {
        let config: AllocatorConfig =
            serde_json::from_str(r#"{"strategy":"first_fit","log_level":"debug"}"#).unwrap();
        assert_eq!(config.strategy, StrategyKind::FirstFit);
        assert_eq!(config.log_level, AllocatorLogLevel::Debug);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }
}
