use thiserror::Error;

use crate::physics::{BodyId, JointId};

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无法打开: {0}")]
    OpenError(String),

    #[error("没有可播放的流")]
    NoStreams,

    #[error("流不存在: #{0}")]
    StreamNotFound(usize),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("队列已中止")]
    Aborted,

    #[error("队列已满（{0} 个包）")]
    QueueFull(usize),

    #[error("配置错误: {0}")]
    ConfigError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

/// 物理世界错误，出错时世界状态保持不变
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhysicsError {
    #[error("刚体重复注册: {0:?}")]
    DuplicateBody(BodyId),

    #[error("刚体不在世界中: {0:?}")]
    BodyNotFound(BodyId),

    #[error("关节重复注册: {0:?}")]
    DuplicateJoint(JointId),

    #[error("关节不在世界中: {0:?}")]
    JointNotFound(JointId),

    #[error("关节两端必须是不同的刚体: {0:?}")]
    InvalidJoint(JointId),

    #[error("步长不能小于 0: {0}")]
    InvalidStep(f64),

    #[error("阻尼不能小于 0: {0}")]
    InvalidDamping(f64),
}

pub type PhysicsResult<T> = std::result::Result<T, PhysicsError>;
