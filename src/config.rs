use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{PoolError, Result};

/// 端点列表的环境变量，内容为逗号分隔的 CDP 地址
pub const ENDPOINTS_ENV: &str = "BROWSER_ENDPOINTS";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 无头浏览器的 CDP 端点列表
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// 每个浏览器连接预热的页面数上限
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_multiplier")]
    pub reconnect_max_multiplier: u32,
}

impl AppConfig {
    /// 读取 config.toml（可缺省），再用环境变量覆盖端点列表
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path.unwrap_or_else(|| Path::new("config.toml"));
        let mut cfg = if path.exists() {
            let raw = fs::read_to_string(path)
                .map_err(|e| PoolError::Config(format!("读取配置文件失败 {}: {}", path.display(), e)))?;
            toml::from_str(&raw)
                .map_err(|e| PoolError::Config(format!("解析配置文件失败 {}: {}", path.display(), e)))?
        } else {
            AppConfig::default()
        };

        if let Ok(raw) = std::env::var(ENDPOINTS_ENV) {
            cfg.endpoints = parse_endpoint_list(&raw);
        }

        Ok(cfg)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            pool_size: default_pool_size(),
            health_check_interval_ms: default_health_check_interval_ms(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_multiplier: default_reconnect_max_multiplier(),
        }
    }
}

/// 把逗号分隔的端点字符串拆成列表，忽略空段
pub fn parse_endpoint_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_pool_size() -> usize {
    10
}

fn default_health_check_interval_ms() -> u64 {
    5000
}

fn default_reconnect_initial_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_multiplier() -> u32 {
    3
}
