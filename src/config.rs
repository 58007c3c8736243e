// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 流水线配置 - 通过JSON文件调整参数

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::DetectionFilter;
use crate::error::ConfigError;

/// 流水线参数配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    // === 队列 ===
    pub queue_capacity: usize, // 待检测帧队列容量 (满时丢弃最新帧)
    pub pop_timeout_ms: u64,   // 检测线程取帧等待时间

    // === 停止 ===
    pub grace_period_ms: u64, // stop() 到释放资源之间的缓冲时间

    // === 采集节奏 ===
    pub device_interval_ms: u64,        // 摄像头采集间隔 (50ms = 20fps)
    pub fallback_file_interval_ms: u64, // 文件帧率缺失时的采集间隔 (40ms = 25fps)

    // === 视频源 ===
    pub read_retries: u32,                  // 单帧读取重试次数
    pub device_fallback_index: Option<u32>, // 主设备打不开时尝试的备用设备
    pub probe_device_on_open: bool,         // 打开摄像头时先试读一帧

    // === 显示 ===
    pub ui_buffer: usize, // 显示通道缓冲 (满时丢弃最新)

    // === 检测 ===
    pub detection: DetectionFilter,

    // === 结果缓存 (导出用) ===
    pub recorder_limit: usize, // 缓存上限
    pub recorder_keep: usize,  // 超限后保留最近的帧数
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            pop_timeout_ms: 50,

            grace_period_ms: 1000,

            device_interval_ms: 50,
            fallback_file_interval_ms: 40,

            read_retries: 3,
            device_fallback_index: Some(1),
            probe_device_on_open: true,

            ui_buffer: 16,

            detection: DetectionFilter::default(),

            recorder_limit: 1000,
            recorder_keep: 500,
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save<P: AsRef<Path>>(&self, path: P) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!("❌ 创建配置目录失败: {}", e);
                    return;
                }
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => warn!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 校验参数合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::new("queue_capacity", "must be at least 1"));
        }
        if self.ui_buffer == 0 {
            return Err(ConfigError::new("ui_buffer", "must be at least 1"));
        }
        if self.pop_timeout_ms == 0 {
            return Err(ConfigError::new("pop_timeout_ms", "must be positive"));
        }
        if self.device_interval_ms == 0 {
            return Err(ConfigError::new("device_interval_ms", "must be positive"));
        }
        if self.fallback_file_interval_ms == 0 {
            return Err(ConfigError::new(
                "fallback_file_interval_ms",
                "must be positive",
            ));
        }
        if self.read_retries == 0 {
            return Err(ConfigError::new("read_retries", "must be at least 1"));
        }
        let conf = self.detection.min_confidence;
        if !(0.0..=1.0).contains(&conf) {
            return Err(ConfigError::new(
                "detection.min_confidence",
                format!("{conf} is outside [0, 1]"),
            ));
        }
        if self.recorder_keep > self.recorder_limit {
            return Err(ConfigError::new(
                "recorder_keep",
                "must not exceed recorder_limit",
            ));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn device_interval(&self) -> Duration {
        Duration::from_millis(self.device_interval_ms)
    }

    pub fn fallback_file_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_file_interval_ms)
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前流水线配置:");
        info!("  队列容量: {}", self.queue_capacity);
        info!("  停止缓冲: {}ms", self.grace_period_ms);
        info!(
            "  采集间隔: 摄像头 {}ms / 文件默认 {}ms",
            self.device_interval_ms, self.fallback_file_interval_ms
        );
        info!("  检测置信度: {:.2}", self.detection.min_confidence);
        if let Some(classes) = &self.detection.classes {
            info!("  检测类别: {:?}", classes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.grace_period(), Duration::from_secs(1));
        assert_eq!(config.fallback_file_interval(), Duration::from_millis(40));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = PipelineConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "queue_capacity");
    }

    #[test]
    fn test_validate_rejects_bad_confidence() {
        let mut config = PipelineConfig::default();
        config.detection.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "queue_capacity": 2, "detection": { "classes": [0] } }"#)
                .unwrap();
        assert_eq!(config.queue_capacity, 2);
        assert_eq!(config.grace_period_ms, 1000);
        assert_eq!(config.detection.classes, Some(vec![0]));
        assert_eq!(config.detection.min_confidence, 0.25);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = PipelineConfig::load(&path);
        assert_eq!(config, PipelineConfig::default());
        assert!(path.exists());

        let reloaded = PipelineConfig::load(&path);
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(PipelineConfig::load(&path), PipelineConfig::default());
    }
}
