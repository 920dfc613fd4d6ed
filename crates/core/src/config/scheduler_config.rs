use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::sections::{
    DispatcherConfig, ObservabilityConfig, PipelineConfig, RetryConfig, WorkerConfig,
};

/// 调度器配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub pipeline: PipelineConfig,
    pub retry: RetryConfig,
    pub observability: ObservabilityConfig,
}

impl SchedulerConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Built-in defaults
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides, e.g. `CHRONOFORGE_WORKER__MAX_CONCURRENT_TASKS=8`
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/chronoforge.toml", "chronoforge.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CHRONOFORGE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: SchedulerConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: SchedulerConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatcher.validate().context("Dispatcher配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.pipeline.validate().context("Pipeline配置验证失败")?;
        self.retry.validate().context("重试配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        Ok(())
    }
}
