//! 内存中的数据源和合成解码器
//!
//! 不依赖系统编解码库，测试和演示程序用它们驱动完整的播放管线。

use crate::core::{
    AudioParams, DecodedAudio, DecodedFrame, Packet, PlayerError, Result, StreamInfo, StreamKind, SubtitleFrame,
    TimeBase, VideoImage,
};
use crate::player::decoder::{AudioDecoder, MediaBackend, SubtitleDecoder, VideoDecoder};
use crate::player::demuxer_source::{DemuxerSource, SeekDirection};
use log::{debug, info};
use std::io;

/// 预先生成好所有包的数据源
pub struct MemorySource {
    name: String,
    streams: Vec<StreamInfo>,
    packets: Vec<Packet>,
    position: usize,
    seekable: bool,
    live: bool,
    pending_read_errors: usize,
    paused: bool,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, streams: Vec<StreamInfo>, packets: Vec<Packet>) -> Self {
        Self {
            name: name.into(),
            streams,
            packets,
            position: 0,
            seekable: true,
            live: false,
            pending_read_errors: 0,
            paused: false,
        }
    }

    /// 生成一段合成媒体：视频帧亮度随帧号变化，音频为锯齿波
    ///
    /// 视频流时间基 1/1000，音频流时间基 1/采样率，每个音频包 1024 个采样帧。
    pub fn synthetic(video: Option<(u32, u32, f64)>, audio: Option<AudioParams>, duration: f64) -> Self {
        let mut streams = Vec::new();
        let mut timed: Vec<(f64, Packet)> = Vec::new();

        if let Some((width, height, fps)) = video {
            let index = streams.len();
            let time_base = TimeBase::new(1, 1000);
            let frame_duration = 1.0 / fps;
            streams.push(StreamInfo {
                index,
                kind: StreamKind::Video,
                time_base,
                frame_duration,
                width,
                height,
                audio: None,
                codec_name: "synthetic-gray".to_string(),
            });
            let frames = (duration * fps).floor() as usize;
            for n in 0..frames {
                let t = n as f64 * frame_duration;
                let pts = time_base.from_seconds(t);
                let payload = vec![(n % 220) as u8 + 16, (n >> 8) as u8, n as u8];
                timed.push((t, Packet::new(index, Some(pts), Some(pts), payload)));
            }
        }

        if let Some(params) = audio {
            let index = streams.len();
            let time_base = TimeBase::new(1, params.sample_rate as i32);
            streams.push(StreamInfo {
                index,
                kind: StreamKind::Audio,
                time_base,
                frame_duration: 0.0,
                width: 0,
                height: 0,
                audio: Some(params),
                codec_name: "pcm_s16le".to_string(),
            });
            const FRAMES_PER_PACKET: usize = 1024;
            let total = (duration * params.sample_rate as f64) as usize;
            let mut start = 0;
            while start < total {
                let frames = FRAMES_PER_PACKET.min(total - start);
                let mut data = Vec::with_capacity(frames * params.bytes_per_frame());
                for i in 0..frames {
                    let value = (((start + i) % 100) as i16 - 50) * 200;
                    for _ in 0..params.channels {
                        data.extend_from_slice(&value.to_le_bytes());
                    }
                }
                let t = start as f64 / params.sample_rate as f64;
                timed.push((t, Packet::new(index, Some(start as i64), Some(start as i64), data)));
                start += frames;
            }
        }

        timed.sort_by(|a, b| a.0.total_cmp(&b.0));
        let packets = timed.into_iter().map(|(_, p)| p).collect();
        Self::new("synthetic", streams, packets)
    }

    /// 追加一条字幕流，`cues` 为 (开始秒, 持续秒, 文本)
    pub fn with_subtitles(mut self, cues: &[(f64, f64, &str)]) -> Self {
        let index = self.streams.len();
        let time_base = TimeBase::new(1, 1000);
        self.streams.push(StreamInfo {
            index,
            kind: StreamKind::Subtitle,
            time_base,
            frame_duration: 0.0,
            width: 0,
            height: 0,
            audio: None,
            codec_name: "text".to_string(),
        });
        for &(start, length, text) in cues {
            let pts = time_base.from_seconds(start);
            let data = format!("{}|{}", (length * 1000.0).round() as i64, text).into_bytes();
            let packet = Packet::new(index, Some(pts), Some(pts), data);
            let at = self
                .packets
                .iter()
                .position(|p| self.packet_seconds(p).is_some_and(|t| t > start))
                .unwrap_or(self.packets.len());
            self.packets.insert(at, packet);
        }
        self
    }

    /// 实时流：不能 seek，暂停时停止读取
    pub fn live(mut self) -> Self {
        self.live = true;
        self.seekable = false;
        self
    }

    /// 接下来的 `count` 次读取返回可重试的 I/O 错误
    pub fn with_read_errors(mut self, count: usize) -> Self {
        self.pending_read_errors = count;
        self
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn packet_seconds(&self, packet: &Packet) -> Option<f64> {
        let stream = self.streams.iter().find(|s| s.index == packet.stream_index)?;
        packet.pts.map(|pts| stream.time_base.to_seconds(pts))
    }
}

impl DemuxerSource for MemorySource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.pending_read_errors > 0 {
            self.pending_read_errors -= 1;
            return Err(PlayerError::IoError(io::Error::new(
                io::ErrorKind::WouldBlock,
                "数据暂不可用",
            )));
        }
        let packet = self.packets.get(self.position).cloned();
        if packet.is_some() {
            self.position += 1;
        }
        Ok(packet)
    }

    fn seek(&mut self, stream_index: Option<usize>, timestamp: i64, direction: SeekDirection) -> Result<()> {
        if !self.seekable {
            return Err(PlayerError::SeekError(format!("{} 不支持 seek", self.name)));
        }
        let target = match stream_index {
            Some(index) => {
                let stream = self
                    .streams
                    .iter()
                    .find(|s| s.index == index)
                    .ok_or(PlayerError::StreamNotFound(index))?;
                stream.time_base.to_seconds(timestamp)
            }
            None => TimeBase::MICROS.to_seconds(timestamp),
        };

        let on_stream = |p: &Packet| stream_index.map_or(true, |i| p.stream_index == i);
        let times: Vec<Option<f64>> = self.packets.iter().map(|p| self.packet_seconds(p)).collect();
        let position = match direction {
            SeekDirection::Forward => self
                .packets
                .iter()
                .zip(&times)
                .position(|(p, t)| on_stream(p) && t.is_some_and(|t| t >= target))
                .unwrap_or(self.packets.len()),
            SeekDirection::Backward => self
                .packets
                .iter()
                .zip(&times)
                .rposition(|(p, t)| on_stream(p) && t.is_some_and(|t| t <= target))
                .unwrap_or(0),
        };
        debug!("⏩ {} seek {:.3}s ({:?}) → 包 #{}", self.name, target, direction, position);
        self.position = position;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn play(&mut self) {
        self.paused = false;
    }

    fn is_eof(&self) -> bool {
        self.position >= self.packets.len()
    }

    fn reads_while_paused(&self) -> bool {
        !self.live
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn description(&self) -> String {
        format!("内存数据源 {} ({} 条流, {} 个包)", self.name, self.streams.len(), self.packets.len())
    }
}

/// 把包内首字节当作亮度生成纯色画面
pub struct SyntheticVideoDecoder {
    width: u32,
    height: u32,
}

impl VideoDecoder for SyntheticVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedFrame>> {
        if packet.is_drain() {
            return Ok(None);
        }
        Ok(Some(DecodedFrame {
            image: VideoImage::solid_yuv(self.width, self.height, packet.data[0]),
            reordered_pts: packet.pts,
            repeat_count: 0,
        }))
    }

    fn flush(&mut self) {}

    fn info(&self) -> String {
        format!("合成视频解码器 {}x{}", self.width, self.height)
    }
}

/// PCM 直通
pub struct PcmAudioDecoder {
    params: AudioParams,
}

impl PcmAudioDecoder {
    pub fn new(params: AudioParams) -> Self {
        Self { params }
    }
}

impl AudioDecoder for PcmAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedAudio>> {
        if packet.is_drain() {
            return Ok(None);
        }
        Ok(Some(DecodedAudio {
            samples: packet.data.clone(),
            pts: packet.pts,
        }))
    }

    fn flush(&mut self) {}

    fn params(&self) -> AudioParams {
        self.params
    }
}

/// `毫秒时长|文本` 格式的字幕
pub struct TextSubtitleDecoder;

impl SubtitleDecoder for TextSubtitleDecoder {
    fn decode(&mut self, packet: &Packet, time_base: TimeBase) -> Result<Option<SubtitleFrame>> {
        if packet.is_drain() {
            return Ok(None);
        }
        let text = std::str::from_utf8(&packet.data)
            .map_err(|e| PlayerError::DecodeError(format!("字幕不是 UTF-8: {}", e)))?;
        let (length_ms, body) = text
            .split_once('|')
            .ok_or_else(|| PlayerError::DecodeError("字幕缺少时长".to_string()))?;
        let length_ms: i64 = length_ms
            .parse()
            .map_err(|_| PlayerError::DecodeError(format!("无效的字幕时长: {}", length_ms)))?;
        let start = packet.pts.map(|pts| time_base.to_seconds(pts)).unwrap_or(0.0);
        Ok(Some(SubtitleFrame {
            start,
            end: start + length_ms as f64 / 1000.0,
            text: body.to_string(),
        }))
    }
}

/// 合成解码器工厂
#[derive(Debug, Default, Clone)]
pub struct SyntheticBackend {
    unavailable: Vec<StreamKind>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让某类解码器打开失败
    pub fn without(mut self, kind: StreamKind) -> Self {
        self.unavailable.push(kind);
        self
    }

    fn check(&self, stream: &StreamInfo) -> Result<()> {
        if self.unavailable.contains(&stream.kind) {
            return Err(PlayerError::DecodeError(format!(
                "找不到 {} 解码器: {}",
                stream.kind.as_str(),
                stream.codec_name
            )));
        }
        Ok(())
    }
}

impl MediaBackend for SyntheticBackend {
    fn open_video_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>> {
        self.check(stream)?;
        info!("✅ 打开合成视频解码器: 流 #{} {}x{}", stream.index, stream.width, stream.height);
        Ok(Box::new(SyntheticVideoDecoder {
            width: stream.width,
            height: stream.height,
        }))
    }

    fn open_audio_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>> {
        self.check(stream)?;
        let params = stream
            .audio
            .ok_or_else(|| PlayerError::DecodeError(format!("流 #{} 缺少音频参数", stream.index)))?;
        info!("✅ 打开 PCM 解码器: {} Hz, {} 声道", params.sample_rate, params.channels);
        Ok(Box::new(PcmAudioDecoder::new(params)))
    }

    fn open_subtitle_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn SubtitleDecoder>> {
        self.check(stream)?;
        Ok(Box::new(TextSubtitleDecoder))
    }
}
