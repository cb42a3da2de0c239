use crate::core::{Result, StreamKind, SyncType};
use crate::physics::Vector2;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 驱动方式：独立线程，或由调用方循环协作驱动
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveMode {
    Threaded,
    Cooperative,
}

/// 播放器配置（替代原先的全局开关）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub audio_disable: bool,
    pub video_disable: bool,
    pub subtitle_disable: bool,
    pub sync_type: SyncType,
    pub drive_mode: DriveMode,

    /// 各类包队列字节上限，超过后解封装线程等待消费
    pub max_video_queue_bytes: usize,
    pub max_audio_queue_bytes: usize,
    pub max_subtitle_queue_bytes: usize,
    /// put 的硬上限（包数），超过返回 QueueFull
    pub max_queue_packets: usize,

    pub picture_queue_size: usize,
    pub subpicture_queue_size: usize,

    /// 硬件音频缓冲（采样帧）
    pub audio_buffer_size: usize,
    /// 音频差值滑动平均的样本数
    pub audio_diff_avg_nb: u32,
    /// 音频缓冲最大调整比例（百分比）
    pub sample_correction_percent_max: u32,

    /// 秒
    pub sync_threshold: f64,
    pub nosync_threshold: f64,
    pub min_refresh_delay: f64,

    /// 读错误后的重试间隔
    pub io_retry_delay_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio_disable: false,
            video_disable: false,
            subtitle_disable: false,
            sync_type: SyncType::AudioMaster,
            drive_mode: DriveMode::Threaded,
            max_video_queue_bytes: 15 * 1024 * 1024,
            max_audio_queue_bytes: 5 * 1024 * 1024,
            max_subtitle_queue_bytes: 1024 * 1024,
            max_queue_packets: 10_000,
            picture_queue_size: 4,
            subpicture_queue_size: 4,
            audio_buffer_size: 1024,
            audio_diff_avg_nb: 20,
            sample_correction_percent_max: 10,
            sync_threshold: 0.01,
            nosync_threshold: 10.0,
            min_refresh_delay: 0.010,
            io_retry_delay_ms: 10,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn is_disabled(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Video => self.video_disable,
            StreamKind::Audio => self.audio_disable,
            StreamKind::Subtitle => self.subtitle_disable,
        }
    }

    pub fn max_queue_bytes(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Video => self.max_video_queue_bytes,
            StreamKind::Audio => self.max_audio_queue_bytes,
            StreamKind::Subtitle => self.max_subtitle_queue_bytes,
        }
    }
}

/// 物理世界配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub gravity: Vector2,
    /// 线速度阻尼（默认 0，不生效）
    pub damping: f64,
    /// 每次 update 的外层迭代次数
    pub max_iterations: usize,
    /// 宽阶段 AABB 重叠容差
    pub aabb_epsilon: f64,
    /// 位置修正系数
    pub bias_factor: f64,
    /// 允许的残余穿透
    pub allowed_penetration: f64,
    /// 相对速度低于此值时不反弹
    pub restitution_threshold: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: Vector2::new(0.0, -9.8),
            damping: 0.0,
            max_iterations: 5,
            aabb_epsilon: 1e-3,
            bias_factor: 0.2,
            allowed_penetration: 0.01,
            restitution_threshold: 1.0,
        }
    }
}

impl WorldConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            PlayerConfig::from_json_str(r#"{"audio_disable": true, "sync_type": "external_master"}"#)
                .unwrap();
        assert!(config.audio_disable);
        assert_eq!(config.sync_type, SyncType::ExternalMaster);
        assert_eq!(config.audio_diff_avg_nb, 20);
        assert!(config.is_disabled(StreamKind::Audio));
    }

    #[test]
    fn test_world_config_json() {
        let config = WorldConfig::from_json_str(r#"{"gravity": {"x": 0.0, "y": -10.0}}"#).unwrap();
        assert_eq!(config.gravity, Vector2::new(0.0, -10.0));
        assert_eq!(config.max_iterations, 5);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let err = PlayerConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, crate::core::PlayerError::ConfigError(_)));
    }
}
