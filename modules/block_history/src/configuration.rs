use anyhow::Result;
use config::Config;

use crate::history_error::BlockHistoryError;

/// Thresholds that stay fixed for the lifetime of a block history.
#[derive(Clone, Debug, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct HistoryConfig {
    /// Descendant chain length at which a block is confirmed.
    pub num_confirmations: u64,
    /// Depth at which a window root is flushed.
    pub stream_size: u64,
    #[serde(default)]
    pub prune_forks_on_confirm: bool,
}

impl HistoryConfig {
    pub fn new(num_confirmations: u64, stream_size: u64) -> Self {
        Self {
            num_confirmations,
            stream_size,
            prune_forks_on_confirm: false,
        }
    }

    pub fn with_fork_pruning(mut self, enabled: bool) -> Self {
        self.prune_forks_on_confirm = enabled;
        self
    }

    /// Load from a host configuration, filling gaps from `config.default.toml`.
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config.default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config.clone())
            .build()?;
        let loaded: Self = full_config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), BlockHistoryError> {
        if self.num_confirmations == 0 {
            return Err(BlockHistoryError::InvalidConfig(
                "num-confirmations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_when_host_config_is_empty() {
        let loaded = HistoryConfig::try_load(&Config::default()).unwrap();
        assert_eq!(loaded, HistoryConfig::new(12, 100));
    }

    #[test]
    fn test_host_values_override_defaults() {
        let host = Config::builder()
            .set_override("num-confirmations", 3)
            .unwrap()
            .set_override("prune-forks-on-confirm", true)
            .unwrap()
            .build()
            .unwrap();
        let loaded = HistoryConfig::try_load(&host).unwrap();
        assert_eq!(loaded.num_confirmations, 3);
        assert_eq!(loaded.stream_size, 100);
        assert!(loaded.prune_forks_on_confirm);
    }

    #[test]
    fn test_zero_confirmations_is_rejected() {
        let host = Config::builder().set_override("num-confirmations", 0).unwrap().build().unwrap();
        assert!(HistoryConfig::try_load(&host).is_err());
        assert!(matches!(
            HistoryConfig::new(0, 5).validate(),
            Err(BlockHistoryError::InvalidConfig(_))
        ));
    }
}
