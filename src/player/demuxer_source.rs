use crate::core::{Packet, Result, StreamInfo, StreamKind};

/// Seek 方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDirection {
    Forward,
    /// 落在目标之前最近的关键帧
    Backward,
}

/// Demuxer 数据源抽象接口
///
/// 不同的媒体源（本地文件、网络流、内存流等）可以实现这个接口
pub trait DemuxerSource: Send {
    /// 容器内所有流的描述
    fn streams(&self) -> &[StreamInfo];

    /// 读取下一个数据包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误（可重试）
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Seek 到指定时间戳
    ///
    /// `stream_index` 为 `Some` 时 `timestamp` 使用该流的时间基，
    /// 否则使用微秒。
    fn seek(&mut self, stream_index: Option<usize>, timestamp: i64, direction: SeekDirection) -> Result<()>;

    /// 暂停后台读取（网络流）
    fn pause(&mut self) {}

    /// 恢复后台读取
    fn play(&mut self) {}

    /// 是否已到达末尾
    fn is_eof(&self) -> bool;

    /// 暂停时是否继续读包（本地文件继续，实时流停止）
    fn reads_while_paused(&self) -> bool {
        true
    }

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        true
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;

    /// 某类流中的第一条
    fn first_stream_of(&self, kind: StreamKind) -> Option<usize> {
        self.streams().iter().find(|s| s.kind == kind).map(|s| s.index)
    }
}
