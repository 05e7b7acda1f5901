// ABOUTME: Configuration loading and validation for wsjournal storage.
// ABOUTME: Reads WSJOURNAL_* environment variables into a StoreConfig with defaults.

use std::path::PathBuf;

use thiserror::Error;

use crate::actor::ActorOptions;
use crate::collection::CollectionOptions;
use crate::replay::ReplayPolicy;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a valid boolean: {value}")]
    InvalidBool { name: &'static str, value: String },

    #[error("{name} is not a valid byte count: {value}")]
    InvalidNumber { name: &'static str, value: String },
}

/// Storage configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub home: PathBuf,
    pub strict_replay: bool,
    pub compact_after_bytes: Option<u64>,
    pub compact_on_close: bool,
}

impl StoreConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - WSJOURNAL_HOME: base directory for collections (default: ~/.wsjournal)
    /// - WSJOURNAL_STRICT_REPLAY: fail to open on a corrupt record (default: false)
    /// - WSJOURNAL_COMPACT_AFTER_BYTES: journal size that triggers compaction (optional)
    /// - WSJOURNAL_COMPACT_ON_CLOSE: compact when a collection actor shuts down (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = std::env::var("WSJOURNAL_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp"))
                    .join(".wsjournal")
            });

        let strict_replay = env_bool("WSJOURNAL_STRICT_REPLAY")?.unwrap_or(false);
        let compact_on_close = env_bool("WSJOURNAL_COMPACT_ON_CLOSE")?.unwrap_or(false);

        let compact_after_bytes = match std::env::var("WSJOURNAL_COMPACT_AFTER_BYTES") {
            Ok(v) if !v.trim().is_empty() => {
                Some(v.trim().parse::<u64>().map_err(|_| ConfigError::InvalidNumber {
                    name: "WSJOURNAL_COMPACT_AFTER_BYTES",
                    value: v.clone(),
                })?)
            }
            _ => None,
        };

        Ok(Self {
            home,
            strict_replay,
            compact_after_bytes,
            compact_on_close,
        })
    }

    pub fn collection_options(&self) -> CollectionOptions {
        CollectionOptions {
            replay_policy: if self.strict_replay {
                ReplayPolicy::Abort
            } else {
                ReplayPolicy::Skip
            },
        }
    }

    pub fn actor_options(&self) -> ActorOptions {
        ActorOptions {
            compact_after_bytes: self.compact_after_bytes,
            compact_on_close: self.compact_on_close,
        }
    }
}

fn env_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    let Ok(value) = std::env::var(name) else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidBool { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 4] = [
        "WSJOURNAL_HOME",
        "WSJOURNAL_STRICT_REPLAY",
        "WSJOURNAL_COMPACT_AFTER_BYTES",
        "WSJOURNAL_COMPACT_ON_CLOSE",
    ];

    fn clear_env() {
        // SAFETY: test-only code; every test touching these vars runs inside
        // the single test below, so nothing reads them concurrently.
        unsafe {
            for var in VARS {
                std::env::remove_var(var);
            }
        }
    }

    // One test for all env scenarios so they never race each other.
    #[test]
    fn config_from_env() {
        clear_env();
        let config = StoreConfig::from_env().unwrap();
        assert!(config.home.to_string_lossy().contains(".wsjournal"));
        assert!(!config.strict_replay);
        assert!(config.compact_after_bytes.is_none());
        assert!(!config.compact_on_close);
        assert_eq!(config.collection_options().replay_policy, ReplayPolicy::Skip);

        // SAFETY: see clear_env.
        unsafe {
            std::env::set_var("WSJOURNAL_HOME", "/var/lib/ws");
            std::env::set_var("WSJOURNAL_STRICT_REPLAY", "yes");
            std::env::set_var("WSJOURNAL_COMPACT_AFTER_BYTES", " 4096 ");
            std::env::set_var("WSJOURNAL_COMPACT_ON_CLOSE", "1");
        }
        let config = StoreConfig::from_env().unwrap();
        assert_eq!(config.home, PathBuf::from("/var/lib/ws"));
        assert!(config.strict_replay);
        assert_eq!(config.compact_after_bytes, Some(4096));
        assert!(config.compact_on_close);
        assert_eq!(config.collection_options().replay_policy, ReplayPolicy::Abort);
        assert_eq!(config.actor_options().compact_after_bytes, Some(4096));

        // SAFETY: see clear_env.
        unsafe {
            std::env::set_var("WSJOURNAL_STRICT_REPLAY", "maybe");
        }
        let err = StoreConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("WSJOURNAL_STRICT_REPLAY"), "{}", err);

        // SAFETY: see clear_env.
        unsafe {
            std::env::remove_var("WSJOURNAL_STRICT_REPLAY");
            std::env::set_var("WSJOURNAL_COMPACT_AFTER_BYTES", "lots");
        }
        let result = StoreConfig::from_env();
        clear_env();
        assert!(matches!(result, Err(ConfigError::InvalidNumber { .. })));
    }
}
