//! 服务发现注册表的配置。
//!
//! # 教案式概览
//! - **意图（Why）**：刷新周期、元数据键与默认端口因部署环境而异，集中为可反序列化的配置；
//! - **契约（What）**：所有字段都有默认值，TOML 中缺省的字段取默认；刷新周期必须大于 0。

use std::time::Duration;

use serde::Deserialize;
use spark_rsocket::RSocketError;
use thiserror::Error;

use crate::strategy::StrategyKind;

pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_ENABLED_METADATA_KEY: &str = "rsocket.enabled";
pub const DEFAULT_PORT_METADATA_KEY: &str = "rsocket.port";
pub const DEFAULT_PORT: u16 = 42252;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// 刷新周期（毫秒）。
    pub refresh_interval_ms: u64,
    /// 值为 `false` 时该实例不参与负载均衡。
    pub enabled_metadata_key: String,
    /// 覆盖实例 RSocket 端口的元数据键。
    pub port_metadata_key: String,
    /// 元数据与地址都未给出端口时使用。
    pub default_port: u16,
    pub strategy: StrategyKind,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            enabled_metadata_key: DEFAULT_ENABLED_METADATA_KEY.to_owned(),
            port_metadata_key: DEFAULT_PORT_METADATA_KEY.to_owned(),
            default_port: DEFAULT_PORT,
            strategy: StrategyKind::default(),
        }
    }
}

impl DiscoveryConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|err| ConfigError::Parse {
            detail: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "refresh_interval_ms",
                detail: "must be greater than zero".to_owned(),
            });
        }
        if self.enabled_metadata_key.is_empty() {
            return Err(ConfigError::Invalid {
                field: "enabled_metadata_key",
                detail: "must not be empty".to_owned(),
            });
        }
        if self.port_metadata_key.is_empty() {
            return Err(ConfigError::Invalid {
                field: "port_metadata_key",
                detail: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }
}

/// 配置加载错误。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("cannot parse discovery config: {detail}")]
    Parse { detail: String },

    #[error("invalid discovery config field `{field}`: {detail}")]
    Invalid { field: &'static str, detail: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Parse { .. } => "rsocket.config.parse",
            ConfigError::Invalid { .. } => "rsocket.config.invalid",
        }
    }
}

impl From<ConfigError> for RSocketError {
    fn from(err: ConfigError) -> Self {
        RSocketError::invalid_argument(err.to_string())
    }
}
