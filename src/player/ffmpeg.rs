//! FFmpeg 后端：容器解封装 + 软件解码
//!
//! 只在启用 `ffmpeg` 特性时编译。

use crate::core::{
    AudioParams, DecodedAudio, DecodedFrame, MediaSource, Packet, PixelFormat, PlayerError, Result, StreamInfo,
    StreamKind, SubtitleFrame, TimeBase, VideoImage,
};
use crate::player::decoder::{AudioDecoder, MediaBackend, SubtitleDecoder, VideoDecoder};
use crate::player::demuxer_source::{DemuxerSource, SeekDirection};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi::AVSubtitleType;
use ffmpeg_next::{codec, format, media, software, util};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::ffi::CStr;

fn time_base_of(stream: &format::stream::Stream) -> TimeBase {
    let tb = stream.time_base();
    TimeBase::new(tb.numerator(), tb.denominator())
}

fn to_ffmpeg_packet(packet: &Packet) -> ffmpeg::Packet {
    let mut out = ffmpeg::Packet::copy(&packet.data);
    out.set_pts(packet.pts);
    out.set_dts(packet.dts);
    out
}

/// FFmpeg 容器源
pub struct FfmpegSource {
    input: format::context::Input,
    streams: Vec<StreamInfo>,
    name: String,
    network: bool,
    eof: bool,
}

// Input 只会在持有它的解封装线程上使用
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    pub fn open(source: &MediaSource) -> Result<Self> {
        ffmpeg::init()?;
        let name = source.name();
        info!("正在打开: {}", name);

        let input = if source.is_network_stream() {
            info!("🌐 检测到网络流，应用优化选项");
            let mut options = ffmpeg::Dictionary::new();
            options.set("fflags", "+discardcorrupt+genpts");
            options.set("timeout", "15000000");
            options.set("rw_timeout", "8000000");
            options.set("reconnect", "1");
            options.set("reconnect_streamed", "1");
            format::input_with_dictionary(&name, options)
                .map_err(|e| PlayerError::OpenError(format!("无法打开网络流: {}", e)))?
        } else {
            format::input(&name).map_err(|e| PlayerError::OpenError(format!("无法打开文件: {}", e)))?
        };

        let mut streams = Vec::new();
        for stream in input.streams() {
            let kind = match stream.parameters().medium() {
                media::Type::Video => StreamKind::Video,
                media::Type::Audio => StreamKind::Audio,
                media::Type::Subtitle => StreamKind::Subtitle,
                _ => continue,
            };
            streams.push(describe_stream(&stream, kind)?);
        }
        debug!("共 {} 条可用流", streams.len());

        Ok(Self {
            input,
            streams,
            name,
            network: source.is_network_stream(),
            eof: false,
        })
    }
}

fn describe_stream(stream: &format::stream::Stream, kind: StreamKind) -> Result<StreamInfo> {
    let parameters = stream.parameters();
    let codec_name = parameters.id().name().to_string();
    let context = codec::context::Context::from_parameters(parameters)?;

    let (width, height, frame_duration, audio) = match kind {
        StreamKind::Video => {
            let decoder = context.decoder().video()?;
            let rate = stream.avg_frame_rate();
            let frame_duration = if rate.numerator() > 0 {
                rate.denominator() as f64 / rate.numerator() as f64
            } else {
                0.0
            };
            (decoder.width(), decoder.height(), frame_duration, None)
        }
        StreamKind::Audio => {
            let decoder = context.decoder().audio()?;
            let params = AudioParams {
                sample_rate: decoder.rate(),
                channels: decoder.channels().clamp(1, 2),
            };
            (0, 0, 0.0, Some(params))
        }
        StreamKind::Subtitle => (0, 0, 0.0, None),
    };

    Ok(StreamInfo {
        index: stream.index(),
        kind,
        time_base: time_base_of(stream),
        frame_duration,
        width,
        height,
        audio,
        codec_name,
    })
}

impl DemuxerSource for FfmpegSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    self.eof = true;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
            let index = packet.stream();
            // 跳过数据流、附件等
            if !self.streams.iter().any(|s| s.index == index) {
                continue;
            }
            let data = packet.data().map(<[u8]>::to_vec).unwrap_or_default();
            return Ok(Some(Packet::new(index, packet.pts(), packet.dts(), data)));
        }
    }

    fn seek(&mut self, stream_index: Option<usize>, timestamp: i64, direction: SeekDirection) -> Result<()> {
        let target = match stream_index.and_then(|i| self.streams.iter().find(|s| s.index == i)) {
            Some(stream) => TimeBase::MICROS.rescale(timestamp, stream.time_base),
            None => timestamp,
        };
        match direction {
            SeekDirection::Backward => self.input.seek(target, ..target)?,
            SeekDirection::Forward => self.input.seek(target, target..)?,
        }
        self.eof = false;
        Ok(())
    }

    fn pause(&mut self) {
        if self.network {
            if let Err(e) = self.input.pause() {
                debug!("暂停网络读取失败: {}", e);
            }
        }
    }

    fn play(&mut self) {
        if self.network {
            if let Err(e) = self.input.play() {
                debug!("恢复网络读取失败: {}", e);
            }
        }
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn reads_while_paused(&self) -> bool {
        !self.network
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.name)
    }
}

/// 软件视频解码：任意像素格式 → YUV420P
struct FfmpegVideoDecoder {
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    pending: VecDeque<DecodedFrame>,
    // 已发送 EOF，直到下一次 flush
    draining: bool,
}

// SwsContext 不是 Send，但每个解码器实例只在一个线程中使用
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    fn receive_frames(&mut self) -> Result<()> {
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let frame = self.convert_frame(&decoded)?;
                    self.pending.push_back(frame);
                }
                Err(ffmpeg::Error::Other { errno: 11 }) | Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn convert_frame(&mut self, frame: &util::frame::Video) -> Result<DecodedFrame> {
        let (width, height) = (frame.width(), frame.height());
        let scaler = match &mut self.scaler {
            Some(scaler) => scaler,
            slot => slot.insert(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::YUV420P,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?),
        };
        let mut yuv = util::frame::Video::empty();
        scaler.run(frame, &mut yuv)?;

        // 按行拷贝去掉 stride 填充
        let mut planes = Vec::with_capacity(3);
        for plane in 0..3 {
            let (w, h) = if plane == 0 {
                (width as usize, height as usize)
            } else {
                ((width as usize).div_ceil(2), (height as usize).div_ceil(2))
            };
            let stride = yuv.stride(plane);
            let src = yuv.data(plane);
            let mut dst = Vec::with_capacity(w * h);
            for row in 0..h {
                dst.extend_from_slice(&src[row * stride..row * stride + w]);
            }
            planes.push(dst);
        }

        Ok(DecodedFrame {
            image: VideoImage {
                width,
                height,
                format: PixelFormat::YUV420P,
                planes,
            },
            reordered_pts: frame.timestamp(),
            repeat_count: frame.repeat().max(0.0) as u32,
        })
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedFrame>> {
        if packet.is_drain() {
            if !self.draining {
                self.draining = true;
                if let Err(e) = self.decoder.send_eof() {
                    debug!("视频解码器 send_eof: {}", e);
                }
                self.receive_frames()?;
            }
            return Ok(self.pending.pop_front());
        }
        match self.decoder.send_packet(&to_ffmpeg_packet(packet)) {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(e) => return Err(e.into()),
        }
        self.receive_frames()?;
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.draining = false;
        self.decoder.flush();
    }

    fn info(&self) -> String {
        "软件解码".to_string()
    }
}

/// 音频解码 + 重采样到交错 S16
struct FfmpegAudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    params: AudioParams,
    pending: VecDeque<DecodedAudio>,
}

unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    fn receive_frames(&mut self) -> Result<()> {
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let chunk = self.convert_frame(&decoded)?;
                    self.pending.push_back(chunk);
                }
                Err(ffmpeg::Error::Other { errno: 11 }) | Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn convert_frame(&mut self, frame: &util::frame::Audio) -> Result<DecodedAudio> {
        let target_layout = match self.params.channels {
            1 => util::channel_layout::ChannelLayout::MONO,
            _ => util::channel_layout::ChannelLayout::STEREO,
        };
        let resampler = match &mut self.resampler {
            Some(resampler) => resampler,
            slot => {
                debug!(
                    "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                    frame.rate(),
                    frame.channels(),
                    self.params.sample_rate,
                    self.params.channels
                );
                slot.insert(software::resampling::Context::get(
                    frame.format(),
                    frame.channel_layout(),
                    frame.rate(),
                    util::format::Sample::I16(util::format::sample::Type::Packed),
                    target_layout,
                    self.params.sample_rate,
                )?)
            }
        };
        let mut resampled = util::frame::Audio::empty();
        resampler.run(frame, &mut resampled)?;

        let len = resampled.samples() * self.params.bytes_per_frame();
        let data = resampled.data(0);
        Ok(DecodedAudio {
            samples: data[..len.min(data.len())].to_vec(),
            pts: frame.timestamp(),
        })
    }
}

impl AudioDecoder for FfmpegAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedAudio>> {
        match self.decoder.send_packet(&to_ffmpeg_packet(packet)) {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(e) => return Err(e.into()),
        }
        self.receive_frames()?;
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.decoder.flush();
    }

    fn params(&self) -> AudioParams {
        self.params
    }
}

/// 文本/ASS 字幕解码；位图字幕忽略
struct FfmpegSubtitleDecoder {
    decoder: codec::decoder::Subtitle,
}

unsafe impl Send for FfmpegSubtitleDecoder {}

impl SubtitleDecoder for FfmpegSubtitleDecoder {
    fn decode(&mut self, packet: &Packet, time_base: TimeBase) -> Result<Option<SubtitleFrame>> {
        let mut subtitle = codec::subtitle::Subtitle::default();
        match self.decoder.decode(&to_ffmpeg_packet(packet), &mut subtitle) {
            Ok(true) => {}
            Ok(false) | Err(ffmpeg::Error::Other { errno: 11 }) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut text = String::new();
        for rect in subtitle.rects() {
            // SAFETY: rect 指向 subtitle 持有的 AVSubtitleRect，在 avsubtitle_free 之前有效
            unsafe {
                let raw = rect.as_ptr();
                let ptr = match (*raw).type_ {
                    AVSubtitleType::SUBTITLE_TEXT => (*raw).text,
                    AVSubtitleType::SUBTITLE_ASS => (*raw).ass,
                    _ => std::ptr::null_mut(),
                };
                if !ptr.is_null() {
                    text.push_str(&CStr::from_ptr(ptr).to_string_lossy());
                    text.push('\n');
                }
            }
        }
        // SAFETY: AVSubtitle 的内部缓冲必须手动释放
        let end_display_ms = unsafe {
            let raw = subtitle.as_mut_ptr();
            let end = (*raw).end_display_time;
            ffmpeg::ffi::avsubtitle_free(raw);
            end
        };

        let text = clean_subtitle_text(&text);
        if text.is_empty() {
            return Ok(None);
        }
        let start = packet.pts.map(|pts| time_base.to_seconds(pts)).unwrap_or(0.0);
        let length = if end_display_ms > 0 {
            end_display_ms as f64 / 1000.0
        } else {
            3.0
        };
        Ok(Some(SubtitleFrame {
            start,
            end: start + length,
            text,
        }))
    }
}

/// 去掉 ASS 覆盖标签 `{...}` 和事件前缀，`\N` 换成换行
fn clean_subtitle_text(text: &str) -> String {
    let mut lines = Vec::new();
    for line in text.lines() {
        // ASS 事件行: ReadOrder,Layer,Style,Name,MarginL,MarginR,MarginV,Effect,Text
        let body = if line.matches(',').count() >= 8 {
            line.splitn(9, ',').nth(8).unwrap_or(line)
        } else {
            line
        };
        let mut out = String::with_capacity(body.len());
        let mut in_tag = false;
        for ch in body.chars() {
            match ch {
                '{' => in_tag = true,
                '}' => in_tag = false,
                _ if !in_tag => out.push(ch),
                _ => {}
            }
        }
        let out = out.replace("\\N", "\n").replace("\\n", "\n");
        let out = out.trim();
        if !out.is_empty() {
            lines.push(out.to_string());
        }
    }
    lines.join("\n")
}

/// 基于 FFmpeg 的解码器工厂
///
/// 解码器需要流的编码参数，所以持有同一文件的第二个输入上下文。
pub struct FfmpegBackend {
    source: MediaSource,
}

impl FfmpegBackend {
    pub fn new(source: MediaSource) -> Self {
        Self { source }
    }

    fn codec_context(&self, stream: &StreamInfo) -> Result<codec::context::Context> {
        let input = format::input(&self.source.name())
            .map_err(|e| PlayerError::OpenError(format!("无法打开: {}", e)))?;
        let ff_stream = input
            .stream(stream.index)
            .ok_or(PlayerError::StreamNotFound(stream.index))?;
        let mut context = codec::context::Context::from_parameters(ff_stream.parameters())?;
        if let Ok(threads) = std::thread::available_parallelism() {
            context.set_threading(codec::threading::Config {
                kind: codec::threading::Type::Frame,
                count: threads.get().min(8),
                ..Default::default()
            });
        }
        Ok(context)
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_video_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn VideoDecoder>> {
        let decoder = self.codec_context(stream)?.decoder().video()?;
        info!("✅ 软件视频解码器: {}x{} {:?}", decoder.width(), decoder.height(), decoder.format());
        Ok(Box::new(FfmpegVideoDecoder {
            decoder,
            scaler: None,
            pending: VecDeque::new(),
            draining: false,
        }))
    }

    fn open_audio_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>> {
        let params = stream
            .audio
            .ok_or_else(|| PlayerError::DecodeError(format!("流 #{} 缺少音频参数", stream.index)))?;
        let decoder = self.codec_context(stream)?.decoder().audio()?;
        info!("✅ 音频解码器: {} → {} Hz/{} 声道 S16", stream.codec_name, params.sample_rate, params.channels);
        Ok(Box::new(FfmpegAudioDecoder {
            decoder,
            resampler: None,
            params,
            pending: VecDeque::new(),
        }))
    }

    fn open_subtitle_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn SubtitleDecoder>> {
        if self.source.is_network_stream() {
            warn!("⚠️ 网络流字幕解码需要重新建立连接: {}", self.source.name());
        }
        let decoder = self.codec_context(stream)?.decoder().subtitle()?;
        Ok(Box::new(FfmpegSubtitleDecoder { decoder }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_ass_event_line() {
        let raw = "0,0,Default,,0,0,0,,{\\an8}第一行\\N第二行";
        assert_eq!(clean_subtitle_text(raw), "第一行\n第二行");
    }

    #[test]
    fn test_clean_plain_text_keeps_commas() {
        assert_eq!(clean_subtitle_text("你好, 世界\n"), "你好, 世界");
    }
}
