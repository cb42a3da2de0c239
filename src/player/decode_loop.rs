//! 解码工作者
//!
//! 每个活动流一个：视频/字幕在独立线程（或协作模式的调用线程）中运行，
//! 音频由输出设备的拉取回调驱动。

use crate::core::{AudioParams, DecodedFrame, Packet, PlayerConfig, QueuedPacket, StreamInfo, TimeBase};
use crate::player::control::PlayerControl;
use crate::player::decoder::{AudioDecoder, SubtitleDecoder, VideoDecoder};
use crate::player::packet_queue::{PacketQueue, QueueGet};
use crate::player::picture_queue::{PictureEnqueue, PictureQueue, SubtitleQueue};
use crate::player::sync::{AudioSync, ClockModel, VideoClock};
use log::{debug, info, warn};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 单步解码的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStep {
    /// 产出一帧并已入队
    Produced,
    /// 消费了一个包但没有输出（解码器缓冲、解码错误）
    Consumed,
    /// 收到 flush 标记，解码器已重置
    Flushed,
    /// 协作模式：画面缓冲已满，本帧被跳过
    Skipped,
    /// 队列为空（仅非阻塞模式）
    Idle,
    Aborted,
}

/// 视频解码工作者
pub struct VideoWorker {
    decoder: Box<dyn VideoDecoder>,
    queue: Arc<PacketQueue>,
    pictures: Arc<PictureQueue>,
    clock: VideoClock,
    time_base: TimeBase,
    control: Arc<PlayerControl>,
    /// 收到 flush 后置位，显示端据此重置帧计时器
    flushed: Arc<AtomicBool>,
    frames: u64,
}

impl VideoWorker {
    pub fn new(
        stream: &StreamInfo,
        decoder: Box<dyn VideoDecoder>,
        queue: Arc<PacketQueue>,
        pictures: Arc<PictureQueue>,
        control: Arc<PlayerControl>,
        flushed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            decoder,
            queue,
            pictures,
            clock: VideoClock::new(stream.frame_duration),
            time_base: stream.time_base,
            control,
            flushed,
            frames: 0,
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames
    }

    /// 取一个包解码；`blocking` 决定队列空/画面缓冲满时是否等待
    pub fn step(&mut self, blocking: bool) -> DecodeStep {
        let packet = match self.queue.get(blocking) {
            QueueGet::Aborted => return DecodeStep::Aborted,
            QueueGet::Empty => return DecodeStep::Idle,
            QueueGet::Item(QueuedPacket::Flush) => {
                self.decoder.flush();
                self.clock.reset(0.0);
                // 标记之前解出的画面都属于旧位置
                self.pictures.clear();
                self.flushed.store(true, Ordering::SeqCst);
                debug!("{} 🧹 视频解码器已 flush", log_ctx());
                return DecodeStep::Flushed;
            }
            QueueGet::Item(QueuedPacket::Data(packet)) => packet,
        };

        if packet.is_drain() {
            return self.drain(&packet, blocking);
        }
        match self.decoder.decode(&packet) {
            Ok(Some(frame)) => self.present(frame, packet.dts, blocking),
            Ok(None) => DecodeStep::Consumed,
            Err(e) => {
                warn!("{} ⚠️ 视频解码失败，跳过该包: {}", log_ctx(), e);
                DecodeStep::Consumed
            }
        }
    }

    /// 文件末尾：反复取出解码器缓存的帧，直到取空
    fn drain(&mut self, packet: &Packet, blocking: bool) -> DecodeStep {
        let mut result = DecodeStep::Consumed;
        loop {
            match self.decoder.decode(packet) {
                Ok(Some(frame)) => match self.present(frame, None, blocking) {
                    DecodeStep::Aborted => return DecodeStep::Aborted,
                    step => result = step,
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("{} ⚠️ 排空解码器失败: {}", log_ctx(), e);
                    break;
                }
            }
        }
        debug!("{} 📄 视频解码器已排空（共 {} 帧）", log_ctx(), self.frames);
        result
    }

    fn present(&mut self, frame: DecodedFrame, dts: Option<i64>, blocking: bool) -> DecodeStep {
        let pts = frame.reordered_pts.or(dts).unwrap_or(0);
        let pts = self.clock.update_video_clock(frame.repeat_count, self.time_base.to_seconds(pts));

        self.frames += 1;
        if self.frames <= 3 || self.frames % 100 == 0 {
            debug!("{} 🎞 视频帧 #{} pts={:.3}s", log_ctx(), self.frames, pts);
        }

        match self.pictures.push(frame.image, pts, blocking) {
            PictureEnqueue::Queued => DecodeStep::Produced,
            PictureEnqueue::Skipped => DecodeStep::Skipped,
            // Seek 已发起，旧位置的帧不再显示
            PictureEnqueue::Discarded => DecodeStep::Consumed,
            PictureEnqueue::Aborted => DecodeStep::Aborted,
        }
    }

    /// 线程主循环：暂停时等待，中止时退出
    pub fn run(mut self) {
        info!("{} 🎬 视频解码线程启动: {}", log_ctx(), self.decoder.info());
        let (queue, control) = (self.queue.clone(), self.control.clone());
        loop {
            if !control.wait_while_paused(|| queue.is_aborted()) {
                break;
            }
            if self.step(true) == DecodeStep::Aborted {
                break;
            }
        }
        info!("{} 🛑 视频解码线程退出（共 {} 帧）", log_ctx(), self.frames);
    }
}

/// 字幕解码工作者
pub struct SubtitleWorker {
    decoder: Box<dyn SubtitleDecoder>,
    queue: Arc<PacketQueue>,
    subtitles: Arc<SubtitleQueue>,
    time_base: TimeBase,
    control: Arc<PlayerControl>,
}

impl SubtitleWorker {
    pub fn new(
        stream: &StreamInfo,
        decoder: Box<dyn SubtitleDecoder>,
        queue: Arc<PacketQueue>,
        subtitles: Arc<SubtitleQueue>,
        control: Arc<PlayerControl>,
    ) -> Self {
        Self {
            decoder,
            queue,
            subtitles,
            time_base: stream.time_base,
            control,
        }
    }

    pub fn step(&mut self, blocking: bool) -> DecodeStep {
        let packet = match self.queue.get(blocking) {
            QueueGet::Aborted => return DecodeStep::Aborted,
            QueueGet::Empty => return DecodeStep::Idle,
            QueueGet::Item(QueuedPacket::Flush) => {
                self.decoder.flush();
                self.subtitles.clear();
                return DecodeStep::Flushed;
            }
            QueueGet::Item(QueuedPacket::Data(packet)) => packet,
        };
        match self.decoder.decode(&packet, self.time_base) {
            Ok(Some(frame)) => match self.subtitles.push(frame, blocking) {
                PictureEnqueue::Queued => DecodeStep::Produced,
                PictureEnqueue::Skipped => DecodeStep::Skipped,
                PictureEnqueue::Discarded => DecodeStep::Consumed,
                PictureEnqueue::Aborted => DecodeStep::Aborted,
            },
            Ok(None) => DecodeStep::Consumed,
            Err(e) => {
                warn!("{} ⚠️ 字幕解码失败: {}", log_ctx(), e);
                DecodeStep::Consumed
            }
        }
    }

    pub fn run(mut self) {
        info!("{} 💬 字幕解码线程启动", log_ctx());
        let (queue, control) = (self.queue.clone(), self.control.clone());
        loop {
            if !control.wait_while_paused(|| queue.is_aborted()) {
                break;
            }
            if self.step(true) == DecodeStep::Aborted {
                break;
            }
        }
        info!("{} 🛑 字幕解码线程退出", log_ctx());
    }
}

/// 音频拉取管线：输出设备回调里解码、同步并设置音频时钟
pub struct AudioRenderer {
    decoder: Box<dyn AudioDecoder>,
    queue: Arc<PacketQueue>,
    clocks: Arc<ClockModel>,
    control: Arc<PlayerControl>,
    sync: AudioSync,
    params: AudioParams,
    time_base: TimeBase,
    silence_bytes: usize,
    buf: Vec<u8>,
    buf_index: usize,
    /// 当前缓冲末尾对应的时间
    audio_clock: f64,
    underruns: u64,
}

impl AudioRenderer {
    pub fn new(
        stream: &StreamInfo,
        decoder: Box<dyn AudioDecoder>,
        queue: Arc<PacketQueue>,
        clocks: Arc<ClockModel>,
        control: Arc<PlayerControl>,
        config: &PlayerConfig,
    ) -> Self {
        let params = decoder.params();
        Self {
            decoder,
            queue,
            clocks,
            control,
            sync: AudioSync::new(params, config),
            params,
            time_base: stream.time_base,
            silence_bytes: config.audio_buffer_size * params.bytes_per_frame(),
            buf: Vec::new(),
            buf_index: 0,
            audio_clock: 0.0,
            underruns: 0,
        }
    }

    pub fn params(&self) -> AudioParams {
        self.params
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// 设备回调：填满 `out`，不足时补静音
    pub fn fill(&mut self, out: &mut [u8]) {
        self.fill_at(out, Instant::now());
    }

    pub fn fill_at(&mut self, out: &mut [u8], now: Instant) {
        let mut written = 0;
        while written < out.len() {
            if self.buf_index >= self.buf.len() {
                match self.decode_frame() {
                    Some(mut samples) => {
                        let bps = self.params.bytes_per_second();
                        let pts = self.audio_clock - samples.len() as f64 / bps;
                        let master = if self.clocks.audio_is_master() {
                            None
                        } else {
                            Some(self.clocks.get_master_clock_at(now))
                        };
                        self.sync.synchronize(&mut samples, pts, master);
                        self.buf = samples;
                    }
                    None => {
                        // 暂停或数据不足：输出静音
                        self.underruns += 1;
                        self.buf.clear();
                        self.buf.resize(self.silence_bytes.max(1), 0);
                    }
                }
                self.buf_index = 0;
            }
            let n = (out.len() - written).min(self.buf.len() - self.buf_index);
            out[written..written + n].copy_from_slice(&self.buf[self.buf_index..self.buf_index + n]);
            written += n;
            self.buf_index += n;
        }

        let remaining = (self.buf.len() - self.buf_index) as f64;
        let value = self.audio_clock - remaining / self.params.bytes_per_second();
        self.clocks.set_audio_clock_at(value, now);
    }

    /// 解出下一块样本；暂停、队列为空或中止时返回 `None`
    fn decode_frame(&mut self) -> Option<Vec<u8>> {
        if self.control.is_paused() {
            return None;
        }
        loop {
            let packet: Packet = match self.queue.get(false) {
                QueueGet::Aborted | QueueGet::Empty => return None,
                QueueGet::Item(QueuedPacket::Flush) => {
                    self.decoder.flush();
                    self.sync.reset();
                    continue;
                }
                QueueGet::Item(QueuedPacket::Data(packet)) => packet,
            };
            if let Some(pts) = packet.pts {
                self.audio_clock = self.time_base.to_seconds(pts);
            }
            match self.decoder.decode(&packet) {
                Ok(Some(decoded)) => {
                    let frame_bytes = self.params.bytes_per_frame();
                    if decoded.samples.is_empty() || decoded.samples.len() % frame_bytes != 0 {
                        warn!(
                            "{} ⚠️ 音频块长度 {} 不是完整采样帧，以静音代替",
                            log_ctx(),
                            decoded.samples.len()
                        );
                        return None;
                    }
                    self.audio_clock += decoded.samples.len() as f64 / self.params.bytes_per_second();
                    return Some(decoded.samples);
                }
                Ok(None) => continue,
                Err(e) => {
                    debug!("{} 音频解码失败，跳过该包: {}", log_ctx(), e);
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StreamKind, SyncType, VideoImage};
    use crate::player::memory::{MemorySource, PcmAudioDecoder, SyntheticBackend};
    use crate::player::decoder::MediaBackend;
    use crate::player::demuxer_source::DemuxerSource;
    use crate::player::picture_queue::DecodedBuffer;
    use std::collections::VecDeque;

    fn video_stream() -> StreamInfo {
        MemorySource::synthetic(Some((8, 4, 25.0)), None, 1.0).streams()[0].clone()
    }

    fn video_worker(queue: Arc<PacketQueue>, pictures: Arc<PictureQueue>) -> (VideoWorker, Arc<AtomicBool>) {
        let stream = video_stream();
        let decoder = SyntheticBackend::new().open_video_decoder(&stream).unwrap();
        let flushed = Arc::new(AtomicBool::new(false));
        let worker = VideoWorker::new(
            &stream,
            decoder,
            queue,
            pictures,
            Arc::new(PlayerControl::new()),
            flushed.clone(),
        );
        (worker, flushed)
    }

    #[test]
    fn test_video_worker_pushes_pictures_with_pts() {
        let queue = Arc::new(PacketQueue::new(StreamKind::Video, 100));
        let pictures = Arc::new(PictureQueue::new(4));
        let (mut worker, _) = video_worker(queue.clone(), pictures.clone());

        queue.put(Packet::new(0, Some(40), Some(40), vec![50])).unwrap();
        queue.put(Packet::new(0, None, None, vec![60])).unwrap();

        assert_eq!(worker.step(false), DecodeStep::Produced);
        assert_eq!(worker.step(false), DecodeStep::Produced);
        assert_eq!(worker.step(false), DecodeStep::Idle);

        let first = pictures.pop().unwrap();
        assert!((first.pts - 0.04).abs() < 1e-9);
        assert_eq!(first.image, VideoImage::solid_yuv(8, 4, 50));
        // 没有时间戳时按帧时长外推
        let second = pictures.pop().unwrap();
        assert!((second.pts - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_video_worker_flush_marks_timer_reset() {
        let queue = Arc::new(PacketQueue::new(StreamKind::Video, 100));
        let pictures = Arc::new(PictureQueue::new(4));
        let (mut worker, flushed) = video_worker(queue.clone(), pictures);

        queue.put_flush().unwrap();
        assert_eq!(worker.step(false), DecodeStep::Flushed);
        assert!(flushed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_frames_decoded_before_flush_marker_are_dropped() {
        let queue = Arc::new(PacketQueue::new(StreamKind::Video, 100));
        let pictures = Arc::new(PictureQueue::new(4));
        let (mut worker, _) = video_worker(queue.clone(), pictures.clone());

        // Seek 已发起，队列里还剩旧位置的包
        pictures.begin_flush();
        queue.put(Packet::new(0, Some(1160), Some(1160), vec![10])).unwrap();
        queue.put_flush().unwrap();
        queue.put(Packet::new(0, Some(0), Some(0), vec![20])).unwrap();

        assert_eq!(worker.step(false), DecodeStep::Consumed);
        assert!(pictures.is_empty());
        assert_eq!(worker.step(false), DecodeStep::Flushed);
        assert_eq!(worker.step(false), DecodeStep::Produced);
        assert_eq!(pictures.pop().unwrap().pts, 0.0);
    }

    /// 数据包只进缓存，排空时逐帧吐出
    struct BufferingDecoder {
        held: VecDeque<DecodedFrame>,
    }

    impl VideoDecoder for BufferingDecoder {
        fn decode(&mut self, packet: &Packet) -> crate::core::Result<Option<DecodedFrame>> {
            if packet.is_drain() {
                return Ok(self.held.pop_front());
            }
            self.held.push_back(DecodedFrame {
                image: VideoImage::solid_yuv(8, 4, packet.data.first().copied().unwrap_or(0)),
                reordered_pts: packet.pts,
                repeat_count: 0,
            });
            Ok(None)
        }

        fn flush(&mut self) {
            self.held.clear();
        }
    }

    fn buffering_worker(queue: Arc<PacketQueue>, pictures: Arc<PictureQueue>) -> VideoWorker {
        VideoWorker::new(
            &video_stream(),
            Box::new(BufferingDecoder { held: VecDeque::new() }),
            queue,
            pictures,
            Arc::new(PlayerControl::new()),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_drain_packet_releases_every_buffered_frame() {
        let queue = Arc::new(PacketQueue::new(StreamKind::Video, 100));
        let pictures = Arc::new(PictureQueue::new(4));
        let mut worker = buffering_worker(queue.clone(), pictures.clone());

        for pts in [0, 40, 80] {
            queue.put(Packet::new(0, Some(pts), Some(pts), vec![1])).unwrap();
            assert_eq!(worker.step(false), DecodeStep::Consumed);
        }
        assert!(pictures.is_empty());

        queue.put(Packet::drain(0)).unwrap();
        assert_eq!(worker.step(false), DecodeStep::Produced);
        assert_eq!(pictures.len(), 3);
        let shown: Vec<f64> = std::iter::from_fn(|| pictures.pop().map(|p| p.pts)).collect();
        assert_eq!(shown.len(), 3);
        assert!((shown[1] - 0.04).abs() < 1e-9);
        assert!((shown[2] - 0.08).abs() < 1e-9);
    }

    #[test]
    fn test_empty_packet_mid_stream_is_not_a_drain() {
        let queue = Arc::new(PacketQueue::new(StreamKind::Video, 100));
        let pictures = Arc::new(PictureQueue::new(4));
        let mut worker = buffering_worker(queue.clone(), pictures.clone());

        queue.put(Packet::new(0, Some(0), Some(0), vec![1])).unwrap();
        queue.put(Packet::new(0, Some(40), Some(40), Vec::new())).unwrap();
        assert_eq!(worker.step(false), DecodeStep::Consumed);
        assert_eq!(worker.step(false), DecodeStep::Consumed);
        // 解码器没有被要求排空
        assert!(pictures.is_empty());
    }

    #[test]
    fn test_cooperative_step_skips_when_ring_full() {
        let queue = Arc::new(PacketQueue::new(StreamKind::Video, 100));
        let pictures = Arc::new(PictureQueue::new(1));
        let (mut worker, _) = video_worker(queue.clone(), pictures.clone());

        queue.put(Packet::new(0, Some(0), Some(0), vec![20])).unwrap();
        queue.put(Packet::new(0, Some(40), Some(40), vec![30])).unwrap();
        assert_eq!(worker.step(false), DecodeStep::Produced);
        assert_eq!(worker.step(false), DecodeStep::Skipped);
        assert_eq!(pictures.len(), 1);
    }

    #[test]
    fn test_video_thread_exits_on_abort() {
        let queue = Arc::new(PacketQueue::new(StreamKind::Video, 100));
        let pictures = Arc::new(PictureQueue::new(4));
        let (worker, _) = video_worker(queue.clone(), pictures);
        let handle = thread::spawn(move || worker.run());
        thread::sleep(std::time::Duration::from_millis(20));
        queue.abort();
        handle.join().unwrap();
    }

    fn audio_renderer(sync_type: SyncType) -> (AudioRenderer, Arc<PacketQueue>, Arc<ClockModel>) {
        let params = AudioParams {
            sample_rate: 8_000,
            channels: 1,
        };
        let stream = MemorySource::synthetic(None, Some(params), 1.0).streams()[0].clone();
        let decoder = SyntheticBackend::new().open_audio_decoder(&stream).unwrap();
        let queue = Arc::new(PacketQueue::new(StreamKind::Audio, 100));
        let clocks = Arc::new(ClockModel::new(sync_type));
        clocks.set_stream_present(StreamKind::Audio, true);
        let config = PlayerConfig {
            audio_buffer_size: 4,
            ..PlayerConfig::default()
        };
        let renderer = AudioRenderer::new(
            &stream,
            decoder,
            queue.clone(),
            clocks.clone(),
            Arc::new(PlayerControl::new()),
            &config,
        );
        (renderer, queue, clocks)
    }

    #[test]
    fn test_audio_fill_copies_samples_and_sets_clock() {
        let (mut renderer, queue, clocks) = audio_renderer(SyncType::AudioMaster);
        // 8 个采样帧，pts = 8000 → 1.0s
        let samples: Vec<u8> = (1..=16).collect();
        queue.put(Packet::new(0, Some(8_000), Some(8_000), samples.clone())).unwrap();

        let now = Instant::now();
        let mut out = vec![0u8; 8];
        renderer.fill_at(&mut out, now);
        assert_eq!(out, samples[..8].to_vec());
        // 缓冲末尾 1.001s，剩余 4 帧未播放
        let expected = 1.001 - 8.0 / 16_000.0;
        assert!((clocks.get_audio_clock_at(now) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_audio_underrun_fills_silence() {
        let (mut renderer, _queue, _clocks) = audio_renderer(SyncType::AudioMaster);
        let mut out = vec![9u8; 20];
        renderer.fill(&mut out);
        assert!(out.iter().all(|&b| b == 0));
        assert!(renderer.underruns() >= 1);
    }

    #[test]
    fn test_audio_flush_resets_decoder_state() {
        let (mut renderer, queue, _clocks) = audio_renderer(SyncType::AudioMaster);
        queue.put(Packet::new(0, Some(0), Some(0), vec![1; 8])).unwrap();
        let mut out = vec![0u8; 4];
        renderer.fill(&mut out);
        assert_eq!(out, vec![1; 4]);

        queue.put_flush().unwrap();
        queue.put(Packet::new(0, Some(800), Some(800), vec![2; 8])).unwrap();
        let mut out = vec![0u8; 8];
        renderer.fill(&mut out);
        // 旧缓冲播完后遇到 flush 标记，直接接上新数据
        assert_eq!(&out[..4], &[1; 4]);
        assert_eq!(&out[4..], &[2; 4]);
    }

    #[test]
    fn test_pcm_decoder_passthrough() {
        let mut decoder = PcmAudioDecoder::new(AudioParams {
            sample_rate: 8_000,
            channels: 1,
        });
        let decoded = decoder.decode(&Packet::new(0, Some(5), None, vec![3, 4])).unwrap().unwrap();
        assert_eq!(decoded.samples, vec![3, 4]);
    }
}
