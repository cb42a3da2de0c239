//! 播放同步核心 + 二维刚体物理核心

pub mod core;
pub mod physics;
pub mod player;
