use crate::core::{AudioParams, DecodedAudio, DecodedFrame, Packet, Result, StreamInfo, SubtitleFrame, TimeBase};

/// 视频解码器
///
/// 每个包产出零或一帧；出错时调用方丢弃该包继续解码。
/// 收到排空包（[`Packet::is_drain`]）时，调用方会用同一个包反复调用
/// `decode`，直到返回 `Ok(None)`。
pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedFrame>>;

    /// 丢弃内部缓存（Seek 后收到 flush 标记时调用）
    fn flush(&mut self);

    fn info(&self) -> String {
        "视频解码器".to_string()
    }
}

/// 音频解码器，输出交错 S16
pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedAudio>>;

    fn flush(&mut self);

    /// 输出的音频参数
    fn params(&self) -> AudioParams;
}

/// 字幕解码器
pub trait SubtitleDecoder: Send {
    fn decode(&mut self, packet: &Packet, time_base: TimeBase) -> Result<Option<SubtitleFrame>>;

    fn flush(&mut self) {}
}

/// 解码器工厂：打开失败属于资源错误，对应的流不会启动
pub trait MediaBackend: Send + Sync {
    fn open_video_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>>;

    fn open_audio_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>>;

    fn open_subtitle_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn SubtitleDecoder>>;
}
