use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 媒体源类型
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 网络流 URL
    NetworkStream { url: String },
}

impl MediaSource {
    /// 从 URL 字符串解析媒体源
    pub fn from_url(url: &str) -> Self {
        let is_network = ["rtsp://", "rtmp://", "http://", "https://"]
            .iter()
            .any(|scheme| url.starts_with(scheme));
        if is_network {
            MediaSource::NetworkStream {
                url: url.to_string(),
            }
        } else {
            // 默认当作本地文件
            MediaSource::LocalFile(PathBuf::from(url))
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, MediaSource::NetworkStream { .. })
    }

    /// 打开用的名字（文件路径或 URL）
    pub fn name(&self) -> String {
        match self {
            MediaSource::LocalFile(path) => path.to_string_lossy().to_string(),
            MediaSource::NetworkStream { url } => url.clone(),
        }
    }
}

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "视频",
            StreamKind::Audio => "音频",
            StreamKind::Subtitle => "字幕",
        }
    }
}

/// 主时钟选择，打开流时确定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    AudioMaster,
    VideoMaster,
    ExternalMaster,
}

/// 时间基（分数），把流时间戳换算为秒
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    /// 微秒时间基（容器内部的统一时间域）
    pub const MICROS: TimeBase = TimeBase { num: 1, den: 1_000_000 };

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// 时间戳 → 秒
    pub fn to_seconds(&self, ts: i64) -> f64 {
        ts as f64 * self.as_f64()
    }

    /// 秒 → 本时间基下的时间戳
    pub fn from_seconds(&self, seconds: f64) -> i64 {
        let tb = self.as_f64();
        if tb == 0.0 {
            0
        } else {
            (seconds / tb).round() as i64
        }
    }

    /// 把 `ts` 从 `from` 时间基换算到本时间基
    pub fn rescale(&self, ts: i64, from: TimeBase) -> i64 {
        let num = ts as i128 * from.num as i128 * self.den as i128;
        let den = from.den as i128 * self.num as i128;
        if den == 0 {
            return 0;
        }
        // 四舍五入（半数远离零）
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let half = den / 2;
        let rounded = if num >= 0 { (num + half) / den } else { (num - half) / den };
        rounded as i64
    }
}

/// 音频参数（交错 S16 样本）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioParams {
    /// 一个采样帧的字节数（所有声道）
    pub fn bytes_per_frame(&self) -> usize {
        2 * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.sample_rate as f64 * self.bytes_per_frame() as f64
    }
}

/// 流描述，由解封装源提供
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub time_base: TimeBase,
    /// 编码器声明的帧时长（秒），视频时钟外推使用
    pub frame_duration: f64,
    pub width: u32,
    pub height: u32,
    pub audio: Option<AudioParams>,
    pub codec_name: String,
}

/// 压缩数据包
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub data: Vec<u8>,
    /// 只由分发器在文件末尾置位；空数据的普通包不是排空包
    drain: bool,
}

impl Packet {
    pub fn new(stream_index: usize, pts: Option<i64>, dts: Option<i64>, data: Vec<u8>) -> Self {
        Self {
            stream_index,
            pts,
            dts,
            data,
            drain: false,
        }
    }

    /// 文件末尾合成的空包，通知解码器吐出缓存的帧
    pub fn drain(stream_index: usize) -> Self {
        Self {
            drain: true,
            ..Self::new(stream_index, None, None, Vec::new())
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_drain(&self) -> bool {
        self.drain
    }
}

/// 包队列中的条目：Seek 后注入的 flush 标记或普通数据包
#[derive(Debug, Clone, PartialEq)]
pub enum QueuedPacket {
    Flush,
    Data(Packet),
}

impl QueuedPacket {
    pub fn size(&self) -> usize {
        match self {
            QueuedPacket::Flush => 0,
            QueuedPacket::Data(packet) => packet.size(),
        }
    }

    pub fn is_flush(&self) -> bool {
        matches!(self, QueuedPacket::Flush)
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    YUV420P,
    RGBA,
}

/// 平面图像（显示接收端的固定布局）
#[derive(Debug, Clone, PartialEq)]
pub struct VideoImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Vec<u8>>,
}

impl VideoImage {
    /// 纯色 YUV420P 图像（测试和演示用）
    pub fn solid_yuv(width: u32, height: u32, luma: u8) -> Self {
        let y = vec![luma; (width * height) as usize];
        let chroma = ((width / 2).max(1) * (height / 2).max(1)) as usize;
        Self {
            width,
            height,
            format: PixelFormat::YUV420P,
            planes: vec![y, vec![128; chroma], vec![128; chroma]],
        }
    }
}

/// 解码器输出的视频帧
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub image: VideoImage,
    /// 解码器重排后的时间戳（优先使用）
    pub reordered_pts: Option<i64>,
    /// 隔行重复场数
    pub repeat_count: u32,
}

/// 解码器输出的音频块（交错 S16）
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<u8>,
    pub pts: Option<i64>,
}

/// 字幕（只关心接口，不关心渲染）
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleFrame {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// 显示目标矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferStatus {
    pub video_packets: usize,
    pub video_bytes: usize,
    pub audio_packets: usize,
    pub audio_bytes: usize,
    pub subtitle_packets: usize,
    pub pictures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_base_rescale() {
        let tb = TimeBase::new(1, 90_000);
        assert_eq!(tb.rescale(2_000_000, TimeBase::MICROS), 180_000);
        assert!((tb.to_seconds(45_000) - 0.5).abs() < 1e-12);
        assert_eq!(tb.from_seconds(2.0), 180_000);
    }

    #[test]
    fn test_media_source_from_url() {
        assert!(MediaSource::from_url("rtsp://cam/1").is_network_stream());
        assert!(!MediaSource::from_url("/tmp/a.mkv").is_network_stream());
        assert_eq!(MediaSource::from_url("/tmp/a.mkv").name(), "/tmp/a.mkv");
    }

    #[test]
    fn test_flush_marker_has_no_size() {
        let data = QueuedPacket::Data(Packet::new(0, Some(1), None, vec![1, 2, 3]));
        assert_eq!(data.size(), 3);
        assert_eq!(QueuedPacket::Flush.size(), 0);
        assert!(Packet::drain(0).is_drain());
    }

    #[test]
    fn test_empty_packet_is_not_drain() {
        let empty = Packet::new(0, Some(5), Some(5), Vec::new());
        assert_eq!(empty.size(), 0);
        assert!(!empty.is_drain());
        assert_ne!(empty, Packet::drain(0));
    }

    #[test]
    fn test_rescale_rounds_to_nearest() {
        let tb = TimeBase::new(1, 1000);
        // 1499µs → 1.499ms → 1，1500µs → 2，-1500µs → -2
        assert_eq!(tb.rescale(1_499, TimeBase::MICROS), 1);
        assert_eq!(tb.rescale(1_500, TimeBase::MICROS), 2);
        assert_eq!(tb.rescale(-1_500, TimeBase::MICROS), -2);
        let ntsc = TimeBase::new(1001, 30_000);
        // 1s = 29.97 帧 → 30
        assert_eq!(ntsc.rescale(1_000_000, TimeBase::MICROS), 30);
    }
}
