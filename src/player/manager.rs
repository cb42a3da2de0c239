use crate::core::{
    BufferStatus, DriveMode, PlaybackState, PlayerConfig, PlayerError, Result, StreamInfo, StreamKind,
};
use crate::player::audio_output::{AudioOutput, AudioSpec};
use crate::player::control::PlayerControl;
use crate::player::decode_loop::{AudioRenderer, DecodeStep, SubtitleWorker, VideoWorker};
use crate::player::decoder::MediaBackend;
use crate::player::demuxer_source::{DemuxerSource, SeekDirection};
use crate::player::demuxer_thread::{
    DemuxerCommand, DemuxerEvent, DemuxerThread, DispatchStep, Dispatcher, Route, RouteTable, SeekRequest,
};
use crate::player::display::{DisplayScheduler, PresentationSink, IDLE_REFRESH};
use crate::player::packet_queue::PacketQueue;
use crate::player::picture_queue::{DecodedBuffer, PictureQueue, SubtitleQueue};
use crate::player::sync::ClockModel;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

/// 解码工作者的运行方式
enum Runner<W> {
    Thread(JoinHandle<()>),
    /// 协作模式：由 `pump()` 在调用线程上单步驱动
    Inline(W),
}

impl<W: Send + 'static> Runner<W> {
    fn start(mode: DriveMode, name: &str, worker: W, run: fn(W)) -> Result<Self> {
        match mode {
            DriveMode::Threaded => thread::Builder::new()
                .name(name.to_string())
                .spawn(move || run(worker))
                .map(Runner::Thread)
                .map_err(PlayerError::IoError),
            DriveMode::Cooperative => Ok(Runner::Inline(worker)),
        }
    }

    fn join(self, what: &str) {
        if let Runner::Thread(handle) = self {
            if handle.join().is_err() {
                error!("{} ❌ {}线程异常退出", log_ctx(), what);
            } else {
                info!("{} ✅ {}线程已结束", log_ctx(), what);
            }
        }
    }
}

struct VideoStream {
    index: usize,
    queue: Arc<PacketQueue>,
    pictures: Arc<PictureQueue>,
    runner: Runner<VideoWorker>,
}

struct AudioStream {
    index: usize,
    queue: Arc<PacketQueue>,
}

struct SubtitleStream {
    index: usize,
    queue: Arc<PacketQueue>,
    subtitles: Arc<SubtitleQueue>,
    runner: Runner<SubtitleWorker>,
}

enum DemuxDriver {
    Threaded(DemuxerThread),
    Cooperative(Box<Dispatcher>),
    Stopped,
}

/// 播放管理器 - 整体控制播放流程
///
/// 持有解封装分发器、每条活动流的包队列和解码工作者、三个时钟以及显示调度。
pub struct PlaybackManager {
    config: PlayerConfig,
    description: String,
    streams: Vec<StreamInfo>,
    state: PlaybackState,
    clocks: Arc<ClockModel>,
    control: Arc<PlayerControl>,
    routes: Arc<RouteTable>,
    command_tx: Sender<DemuxerCommand>,
    events_rx: Receiver<DemuxerEvent>,
    driver: DemuxDriver,
    backend: Arc<dyn MediaBackend>,
    audio_output: Box<dyn AudioOutput>,
    display: DisplayScheduler,
    // 视频流 flush 后置位，下一次显示重置帧计时器
    video_flushed: Arc<AtomicBool>,
    video: Option<VideoStream>,
    audio: Option<AudioStream>,
    subtitle: Option<SubtitleStream>,
}

impl PlaybackManager {
    /// 打开媒体源：为每类流选第一条可用的流并启动，再启动解封装
    ///
    /// 任何一条流的解码器或输出设备打开失败都视为打开失败。
    pub fn open(
        source: Box<dyn DemuxerSource>,
        backend: Arc<dyn MediaBackend>,
        audio_output: Box<dyn AudioOutput>,
        config: PlayerConfig,
    ) -> Result<Self> {
        let description = source.description();
        info!("{} 📂 打开媒体源: {}", log_ctx(), description);

        let streams = source.streams().to_vec();
        if streams.is_empty() {
            return Err(PlayerError::NoStreams);
        }
        for stream in &streams {
            debug!(
                "{} 流 #{}: {} {} tb={}/{}",
                log_ctx(),
                stream.index,
                stream.kind.as_str(),
                stream.codec_name,
                stream.time_base.num,
                stream.time_base.den
            );
        }

        let clocks = Arc::new(ClockModel::new(config.sync_type));
        let (table, space_rx) = RouteTable::new();
        let routes = Arc::new(table);
        let (command_tx, command_rx) = unbounded();
        let (event_tx, events_rx) = bounded(64);
        let dispatcher = Dispatcher::new(
            source,
            routes.clone(),
            command_rx,
            space_rx,
            event_tx,
            Duration::from_millis(config.io_retry_delay_ms),
        );
        let video_flushed = Arc::new(AtomicBool::new(false));
        let display = DisplayScheduler::new(clocks.clone(), video_flushed.clone(), &config);

        let mut manager = Self {
            config,
            description,
            streams,
            state: PlaybackState::Idle,
            clocks,
            control: Arc::new(PlayerControl::new()),
            routes,
            command_tx,
            events_rx,
            driver: DemuxDriver::Stopped,
            backend,
            audio_output,
            display,
            video_flushed,
            video: None,
            audio: None,
            subtitle: None,
        };

        for kind in [StreamKind::Audio, StreamKind::Video, StreamKind::Subtitle] {
            if manager.config.is_disabled(kind) {
                info!("{} {}已禁用", log_ctx(), kind.as_str());
                continue;
            }
            let Some(index) = manager.first_stream_of(kind) else {
                continue;
            };
            if let Err(e) = manager.stream_component_open(index) {
                error!("{} ❌ 打开{}流 #{} 失败: {}", log_ctx(), kind.as_str(), index, e);
                manager.stop();
                return Err(e);
            }
        }
        if manager.video.is_none() && manager.audio.is_none() && manager.subtitle.is_none() {
            manager.stop();
            return Err(PlayerError::NoStreams);
        }

        manager.driver = match manager.config.drive_mode {
            DriveMode::Threaded => DemuxDriver::Threaded(DemuxerThread::start(dispatcher, manager.command_tx.clone())?),
            DriveMode::Cooperative => DemuxDriver::Cooperative(Box::new(dispatcher)),
        };
        manager.state = PlaybackState::Playing;
        info!("{} ✅ 播放开始: {}", log_ctx(), manager.description);
        Ok(manager)
    }

    fn first_stream_of(&self, kind: StreamKind) -> Option<usize> {
        self.streams.iter().find(|s| s.kind == kind).map(|s| s.index)
    }

    /// 打开一条流：创建包队列和解码器，启动解码工作者，注册到路由表
    pub fn stream_component_open(&mut self, index: usize) -> Result<()> {
        let stream = self
            .streams
            .iter()
            .find(|s| s.index == index)
            .cloned()
            .ok_or(PlayerError::StreamNotFound(index))?;
        let kind = stream.kind;
        if self.config.is_disabled(kind) {
            return Err(PlayerError::OpenError(format!("{}已禁用", kind.as_str())));
        }
        self.stream_component_close(kind);

        let queue = Arc::new(
            PacketQueue::new(kind, self.config.max_queue_packets).with_space_notifier(self.routes.space_notifier()),
        );
        let mut decoded: Option<Arc<dyn DecodedBuffer>> = None;

        match kind {
            StreamKind::Video => {
                let decoder = self.backend.open_video_decoder(&stream)?;
                let pictures = Arc::new(PictureQueue::new(self.config.picture_queue_size));
                self.video_flushed.store(true, Ordering::SeqCst);
                let worker = VideoWorker::new(
                    &stream,
                    decoder,
                    queue.clone(),
                    pictures.clone(),
                    self.control.clone(),
                    self.video_flushed.clone(),
                );
                let runner = Runner::start(self.config.drive_mode, "video-decoder", worker, VideoWorker::run)?;
                decoded = Some(pictures.clone());
                self.video = Some(VideoStream {
                    index,
                    queue: queue.clone(),
                    pictures,
                    runner,
                });
            }
            StreamKind::Audio => {
                let decoder = self.backend.open_audio_decoder(&stream)?;
                let params = decoder.params();
                let mut renderer = AudioRenderer::new(
                    &stream,
                    decoder,
                    queue.clone(),
                    self.clocks.clone(),
                    self.control.clone(),
                    &self.config,
                );
                let wanted = AudioSpec {
                    params,
                    buffer_frames: self.config.audio_buffer_size,
                };
                let accepted = self
                    .audio_output
                    .open(wanted, Box::new(move |buf: &mut [u8]| renderer.fill(buf)))?;
                if accepted.params != params {
                    self.audio_output.close();
                    return Err(PlayerError::AudioError(format!(
                        "输出设备格式不匹配: 需要 {} Hz/{} 声道，实际 {} Hz/{} 声道",
                        params.sample_rate, params.channels, accepted.params.sample_rate, accepted.params.channels
                    )));
                }
                if self.control.is_paused() {
                    self.audio_output.pause(true);
                }
                self.audio = Some(AudioStream {
                    index,
                    queue: queue.clone(),
                });
            }
            StreamKind::Subtitle => {
                let decoder = self.backend.open_subtitle_decoder(&stream)?;
                let subtitles = Arc::new(SubtitleQueue::new(self.config.subpicture_queue_size));
                let worker = SubtitleWorker::new(&stream, decoder, queue.clone(), subtitles.clone(), self.control.clone());
                let runner = Runner::start(self.config.drive_mode, "subtitle-decoder", worker, SubtitleWorker::run)?;
                decoded = Some(subtitles.clone());
                self.subtitle = Some(SubtitleStream {
                    index,
                    queue: queue.clone(),
                    subtitles,
                    runner,
                });
            }
        }

        self.routes.insert(Route {
            index,
            kind,
            time_base: stream.time_base,
            queue,
            decoded,
            max_bytes: self.config.max_queue_bytes(kind),
        });
        self.clocks.set_stream_present(kind, true);
        info!("{} ✅ 打开{}流 #{} ({})", log_ctx(), kind.as_str(), index, stream.codec_name);
        Ok(())
    }

    /// 关闭某类流：中止队列 → 等待工作者退出 → 释放队列
    pub fn stream_component_close(&mut self, kind: StreamKind) {
        match kind {
            StreamKind::Video => {
                let Some(video) = self.video.take() else { return };
                self.routes.remove(kind);
                video.queue.abort();
                video.pictures.abort();
                self.control.wake_all();
                video.runner.join("视频解码");
                video.pictures.clear();
                release_queue(video.queue);
                info!("{} 关闭视频流 #{}", log_ctx(), video.index);
            }
            StreamKind::Audio => {
                let Some(audio) = self.audio.take() else { return };
                self.routes.remove(kind);
                audio.queue.abort();
                self.audio_output.close();
                release_queue(audio.queue);
                info!("{} 关闭音频流 #{}", log_ctx(), audio.index);
            }
            StreamKind::Subtitle => {
                let Some(subtitle) = self.subtitle.take() else { return };
                self.routes.remove(kind);
                subtitle.queue.abort();
                subtitle.subtitles.abort();
                self.control.wake_all();
                subtitle.runner.join("字幕解码");
                release_queue(subtitle.queue);
                info!("{} 关闭字幕流 #{}", log_ctx(), subtitle.index);
            }
        }
        self.clocks.set_stream_present(kind, false);
    }

    /// 切换到同类的下一条流；字幕可以切换到"无"
    ///
    /// 返回切换后的流序号。
    pub fn stream_cycle_channel(&mut self, kind: StreamKind) -> Result<Option<usize>> {
        let current = self.active_stream(kind);
        let candidates: Vec<usize> = self.streams.iter().filter(|s| s.kind == kind).map(|s| s.index).collect();
        let Some(&first) = candidates.first() else {
            return Ok(current);
        };

        let next = match current {
            None => Some(first),
            Some(cur) => match candidates.iter().copied().find(|&i| i > cur) {
                Some(i) => Some(i),
                None if kind == StreamKind::Subtitle => None,
                None => Some(first),
            },
        };
        if next == current {
            return Ok(current);
        }

        info!("{} 🔀 切换{}流: {:?} → {:?}", log_ctx(), kind.as_str(), current, next);
        self.stream_component_close(kind);
        if let Some(index) = next {
            self.stream_component_open(index)?;
        }
        Ok(next)
    }

    pub fn active_stream(&self, kind: StreamKind) -> Option<usize> {
        match kind {
            StreamKind::Video => self.video.as_ref().map(|v| v.index),
            StreamKind::Audio => self.audio.as_ref().map(|a| a.index),
            StreamKind::Subtitle => self.subtitle.as_ref().map(|s| s.index),
        }
    }

    /// 暂停播放
    ///
    /// 三个时钟同时冻结，解码线程在条件变量上等待，显示调度停止取帧。
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        info!("{} 🎬 暂停", log_ctx());
        let now = Instant::now();
        self.clocks.pause_at(now);
        self.display.pause_at(now);
        self.control.set_paused(true);
        self.audio_output.pause(true);
        self.send_command(DemuxerCommand::Pause(true));
        self.state = PlaybackState::Paused;
    }

    /// 恢复播放：时钟从冻结值继续，帧计时器顺延暂停时长
    pub fn resume(&mut self) {
        if self.state != PlaybackState::Paused {
            return;
        }
        info!("{} ▶️ 恢复播放", log_ctx());
        let now = Instant::now();
        self.display.resume_at(now);
        self.clocks.resume_at(now);
        self.control.set_paused(false);
        self.audio_output.pause(false);
        self.send_command(DemuxerCommand::Pause(false));
        self.state = PlaybackState::Playing;
    }

    pub fn toggle_pause(&mut self) {
        if self.is_paused() {
            self.resume();
        } else {
            self.pause();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlaybackState::Paused
    }

    /// Seek 到绝对位置（秒），落在目标之前的关键帧
    pub fn seek(&mut self, position: f64) -> Result<()> {
        self.request_seek(position, SeekDirection::Backward)
    }

    /// 相对当前位置 Seek；向后跳时选择目标之前的关键帧
    pub fn seek_relative(&mut self, delta: f64) -> Result<()> {
        let direction = if delta < 0.0 {
            SeekDirection::Backward
        } else {
            SeekDirection::Forward
        };
        self.request_seek(self.position() + delta, direction)
    }

    fn request_seek(&mut self, position: f64, direction: SeekDirection) -> Result<()> {
        if self.state == PlaybackState::Stopped {
            return Err(PlayerError::SeekError("播放已停止".to_string()));
        }
        let position = position.max(0.0);
        info!("{} 🎯 Seek 到: {:.3}s ({:?})", log_ctx(), position, direction);

        // 预设时钟为目标位置，新数据到达后由音频/显示端校正
        self.clocks.reset_all_at(position, Instant::now());
        // 解码端处理到 flush 标记之前的输出都来自旧位置
        if let Some(video) = &self.video {
            video.pictures.begin_flush();
        }
        if let Some(subtitle) = &self.subtitle {
            subtitle.subtitles.begin_flush();
        }

        self.command_tx
            .send(DemuxerCommand::Seek(SeekRequest {
                target_us: (position * 1_000_000.0).round() as i64,
                direction,
            }))
            .map_err(|e| PlayerError::SeekError(format!("发送 Seek 命令失败: {}", e)))
    }

    fn send_command(&self, cmd: DemuxerCommand) {
        if let Err(e) = self.command_tx.send(cmd) {
            warn!("{} ⚠️ 发送命令到 Demuxer 失败: {}", log_ctx(), e);
        }
    }

    /// 显示一帧并返回距下一次刷新的等待时间（显示线程循环调用）
    pub fn video_refresh(&self, sink: &mut dyn PresentationSink) -> Duration {
        match &self.video {
            Some(video) => {
                let subtitles = self.subtitle.as_ref().map(|s| s.subtitles.as_ref());
                self.display.refresh(sink, &video.pictures, subtitles).next_delay
            }
            None => IDLE_REFRESH,
        }
    }

    /// 到期才显示；返回是否显示了新的一帧
    pub fn refresh_if_due(&self, sink: &mut dyn PresentationSink) -> bool {
        let Some(video) = &self.video else {
            return false;
        };
        let subtitles = self.subtitle.as_ref().map(|s| s.subtitles.as_ref());
        self.display
            .refresh_if_due(sink, &video.pictures, subtitles)
            .is_some_and(|outcome| outcome.displayed)
    }

    /// 协作模式：在调用线程上推进一次解封装、一次视频/字幕解码和一次显示检查
    ///
    /// 线程模式下只做显示检查。返回是否显示了新的一帧。
    pub fn pump(&mut self, sink: &mut dyn PresentationSink) -> bool {
        if !self.is_paused() {
            if let DemuxDriver::Cooperative(dispatcher) = &mut self.driver {
                if dispatcher.step(false) == DispatchStep::Exit {
                    warn!("{} ⚠️ 分发器已退出", log_ctx());
                    self.driver = DemuxDriver::Stopped;
                }
            }
            if let Some(VideoStream {
                runner: Runner::Inline(worker),
                ..
            }) = &mut self.video
            {
                if worker.step(false) == DecodeStep::Aborted {
                    debug!("{} 视频队列已中止", log_ctx());
                }
            }
            if let Some(SubtitleStream {
                runner: Runner::Inline(worker),
                ..
            }) = &mut self.subtitle
            {
                worker.step(false);
            }
        }
        self.refresh_if_due(sink)
    }

    /// 取走 Demuxer 上报的事件（Seek 结果、EOF、读错误）
    pub fn poll_events(&self) -> Vec<DemuxerEvent> {
        self.events_rx.try_iter().collect()
    }

    /// 当前播放位置（主时钟，秒）
    pub fn position(&self) -> f64 {
        self.clocks.get_master_clock()
    }

    pub fn clocks(&self) -> &Arc<ClockModel> {
        &self.clocks
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// 获取缓冲状态（用于监控和调试）
    pub fn buffer_status(&self) -> BufferStatus {
        let mut status = BufferStatus::default();
        if let Some(video) = &self.video {
            status.video_packets = video.queue.count();
            status.video_bytes = video.queue.size();
            status.pictures = video.pictures.len();
        }
        if let Some(audio) = &self.audio {
            status.audio_packets = audio.queue.count();
            status.audio_bytes = audio.queue.size();
        }
        if let Some(subtitle) = &self.subtitle {
            status.subtitle_packets = subtitle.queue.count();
        }
        status
    }

    /// 停止播放：先停解封装，再逐条关闭流
    pub fn stop(&mut self) {
        if self.state == PlaybackState::Stopped {
            return;
        }
        info!("{} ⏹️  停止播放", log_ctx());
        match std::mem::replace(&mut self.driver, DemuxDriver::Stopped) {
            DemuxDriver::Threaded(mut thread) => {
                if let Some(stats) = thread.stop() {
                    info!("{} ✅ DemuxerThread 已停止（{} 个包）", log_ctx(), stats.packets);
                }
            }
            DemuxDriver::Cooperative(_) | DemuxDriver::Stopped => {}
        }
        self.control.abort();
        for kind in [StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle] {
            self.stream_component_close(kind);
        }
        self.state = PlaybackState::Stopped;
        info!("{} ✅ 停止播放完成，所有线程已清理", log_ctx());
    }
}

/// 工作者退出后释放队列中剩余的包
fn release_queue(queue: Arc<PacketQueue>) {
    let kind = queue.kind();
    match Arc::try_unwrap(queue) {
        Ok(queue) => {
            let left = queue.destroy();
            if left > 0 {
                debug!("{} 🗑️  释放{}包队列: {} 个包", log_ctx(), kind.as_str(), left);
            }
        }
        Err(queue) => queue.flush(),
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AudioParams, SyncType};
    use crate::player::audio_output::ManualAudioOutput;
    use crate::player::display::NullSink;
    use crate::player::memory::{MemorySource, SyntheticBackend};

    fn video_only() -> Box<MemorySource> {
        Box::new(MemorySource::synthetic(Some((16, 8, 25.0)), None, 2.0))
    }

    fn mono() -> AudioParams {
        AudioParams {
            sample_rate: 8_000,
            channels: 1,
        }
    }

    fn open(source: Box<MemorySource>, config: PlayerConfig) -> Result<PlaybackManager> {
        PlaybackManager::open(
            source,
            Arc::new(SyntheticBackend::new()),
            Box::new(ManualAudioOutput::new()),
            config,
        )
    }

    /// 循环刷新直到显示出 `frames` 帧
    fn display_frames(player: &PlaybackManager, sink: &mut NullSink, frames: u64) {
        for _ in 0..400 {
            if sink.frames >= frames {
                return;
            }
            player.video_refresh(sink);
            thread::sleep(Duration::from_millis(5));
        }
        panic!("只显示了 {} 帧", sink.frames);
    }

    #[test]
    fn test_pause_freezes_and_resume_continues_video_clock() {
        let mut player = open(video_only(), PlayerConfig::default()).unwrap();
        let mut sink = NullSink::new(64, 64);
        display_frames(&player, &mut sink, 2);

        player.pause();
        assert!(player.is_paused());
        let frozen = player.clocks().get_video_clock();
        thread::sleep(Duration::from_millis(50));
        assert!((player.clocks().get_video_clock() - frozen).abs() < 1e-9);
        // 暂停时不显示新画面
        let shown = sink.frames;
        player.video_refresh(&mut sink);
        assert_eq!(sink.frames, shown);

        player.resume();
        thread::sleep(Duration::from_millis(40));
        let advanced = player.clocks().get_video_clock() - frozen;
        assert!(advanced >= 0.02 && advanced < 0.5, "advanced {}", advanced);
        player.stop();
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_missing_decoder_fails_open() {
        let source = Box::new(MemorySource::synthetic(Some((16, 8, 25.0)), Some(mono()), 1.0));
        let result = PlaybackManager::open(
            source,
            Arc::new(SyntheticBackend::new().without(StreamKind::Audio)),
            Box::new(ManualAudioOutput::new()),
            PlayerConfig::default(),
        );
        assert!(matches!(result, Err(PlayerError::DecodeError(_))));
    }

    #[test]
    fn test_disabled_stream_is_not_opened() {
        let source = Box::new(MemorySource::synthetic(Some((16, 8, 25.0)), Some(mono()), 1.0));
        let config = PlayerConfig {
            video_disable: true,
            ..PlayerConfig::default()
        };
        let player = open(source, config).unwrap();
        assert_eq!(player.active_stream(StreamKind::Video), None);
        assert_eq!(player.active_stream(StreamKind::Audio), Some(1));
        assert!(player.clocks().has_audio());
        assert!(!player.clocks().has_video());
    }

    #[test]
    fn test_audio_pull_drives_master_clock() {
        let output = ManualAudioOutput::new();
        let handle = output.handle();
        let source = Box::new(MemorySource::synthetic(None, Some(mono()), 1.0));
        let config = PlayerConfig {
            sync_type: SyncType::AudioMaster,
            ..PlayerConfig::default()
        };
        let player = PlaybackManager::open(source, Arc::new(SyntheticBackend::new()), Box::new(output), config).unwrap();

        let mut heard = false;
        for _ in 0..200 {
            let buf = handle.pull(512).unwrap();
            if buf.iter().any(|&b| b != 0) {
                heard = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(heard);
        let audio = player.clocks().get_audio_clock();
        assert!(audio > 0.0 && audio < 1.0, "audio clock {}", audio);
        assert!((player.position() - audio).abs() < 0.05);
    }

    #[test]
    fn test_seek_presets_position_and_reports_done() {
        let mut player = open(video_only(), PlayerConfig::default()).unwrap();
        player.seek(1.0).unwrap();
        assert!((player.position() - 1.0).abs() < 0.05);

        let mut done = false;
        for _ in 0..200 {
            if player
                .poll_events()
                .contains(&DemuxerEvent::SeekDone { target_us: 1_000_000 })
            {
                done = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(done);

        // Seek 后显示的画面来自目标位置附近
        let mut sink = NullSink::new(64, 64);
        for _ in 0..400 {
            player.video_refresh(&mut sink);
            if sink.frames > 0 && player.clocks().get_video_clock() >= 0.99 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(player.clocks().get_video_clock() >= 0.99);
    }

    /// 合成画面的亮度 = 帧号 + 16
    fn shown_frame(sink: &NullSink) -> Option<u8> {
        sink.last_luma.map(|luma| luma - 16)
    }

    /// 一直刷新到显示出 `frame` 号（及之后）的画面
    fn play_until_frame(player: &PlaybackManager, sink: &mut NullSink, frame: u8) {
        for _ in 0..600 {
            let delay = player.video_refresh(sink);
            if shown_frame(sink).is_some_and(|n| n >= frame) {
                return;
            }
            thread::sleep(delay.min(Duration::from_millis(10)));
        }
        panic!("没有播放到第 {} 帧", frame);
    }

    /// Seek 之后依次显示的 (帧号, 字幕)
    fn frames_after_seek(player: &PlaybackManager, sink: &mut NullSink, count: usize) -> Vec<(u8, Option<String>)> {
        let mut shown = Vec::new();
        let mut last = sink.frames;
        for _ in 0..600 {
            let delay = player.video_refresh(sink);
            if sink.frames > last {
                last = sink.frames;
                if let Some(n) = shown_frame(sink) {
                    shown.push((n, sink.last_subtitle.clone()));
                }
                if shown.len() >= count {
                    break;
                }
            }
            thread::sleep(delay.min(Duration::from_millis(10)));
        }
        shown
    }

    #[test]
    fn test_no_stale_picture_after_backward_seek() {
        let source = Box::new(MemorySource::synthetic(Some((16, 8, 25.0)), None, 3.0));
        let mut player = open(source, PlayerConfig::default()).unwrap();
        let mut sink = NullSink::new(64, 64);
        play_until_frame(&player, &mut sink, 25);

        player.seek(0.0).unwrap();
        let shown = frames_after_seek(&player, &mut sink, 3);
        assert_eq!(shown.len(), 3);
        // 第一帧就是目标位置（0.04s 以内），之后按顺序播放
        assert_eq!(shown[0].0, 0, "shown {:?}", shown);
        assert_eq!(shown.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(player.clocks().get_video_clock() < 0.5);
    }

    #[test]
    fn test_subtitle_shown_after_backward_seek() {
        let cues: Vec<(f64, f64, String)> = (0..20).map(|i| (i as f64 * 0.1, 0.09, format!("c{}", i))).collect();
        let cues: Vec<(f64, f64, &str)> = cues.iter().map(|(s, l, t)| (*s, *l, t.as_str())).collect();
        let source = Box::new(MemorySource::synthetic(Some((16, 8, 25.0)), None, 2.0).with_subtitles(&cues));
        let mut player = open(source, PlayerConfig::default()).unwrap();
        let mut sink = NullSink::new(64, 64);
        play_until_frame(&player, &mut sink, 13);

        player.seek(0.0).unwrap();
        let shown = frames_after_seek(&player, &mut sink, 3);
        assert_eq!(shown.len(), 3, "shown {:?}", shown);
        // 帧 0/1/2 落在 c0 (0.00~0.09s) 内
        assert!(shown.iter().all(|(n, _)| *n <= 2), "shown {:?}", shown);
        assert!(
            shown.iter().any(|(_, sub)| sub.as_deref() == Some("c0")),
            "shown {:?}",
            shown
        );
    }

    #[test]
    fn test_cycle_subtitle_wraps_through_none() {
        let source = Box::new(
            MemorySource::synthetic(Some((16, 8, 25.0)), None, 1.0)
                .with_subtitles(&[(0.0, 1.0, "甲")])
                .with_subtitles(&[(0.0, 1.0, "乙")]),
        );
        let mut player = open(source, PlayerConfig::default()).unwrap();
        assert_eq!(player.active_stream(StreamKind::Subtitle), Some(1));
        assert_eq!(player.stream_cycle_channel(StreamKind::Subtitle).unwrap(), Some(2));
        assert_eq!(player.stream_cycle_channel(StreamKind::Subtitle).unwrap(), None);
        assert_eq!(player.active_stream(StreamKind::Subtitle), None);
        assert_eq!(player.stream_cycle_channel(StreamKind::Subtitle).unwrap(), Some(1));
        // 只有一条视频流时保持不变
        assert_eq!(player.stream_cycle_channel(StreamKind::Video).unwrap(), Some(0));
    }

    #[test]
    fn test_cooperative_pump_displays_frames() {
        let config = PlayerConfig {
            drive_mode: DriveMode::Cooperative,
            ..PlayerConfig::default()
        };
        let mut player = open(video_only(), config).unwrap();
        let mut sink = NullSink::new(32, 32);
        for _ in 0..400 {
            if sink.frames >= 3 {
                break;
            }
            player.pump(&mut sink);
            thread::sleep(Duration::from_millis(5));
        }
        assert!(sink.frames >= 3);
        assert_eq!(sink.last_rect.map(|r| (r.width, r.height)), Some((32, 16)));
    }

    #[test]
    fn test_stop_releases_everything() {
        let mut player = open(video_only(), PlayerConfig::default()).unwrap();
        thread::sleep(Duration::from_millis(20));
        player.stop();
        assert_eq!(player.buffer_status(), BufferStatus::default());
        assert!(player.seek(0.5).is_err());
        // 重复 stop 无副作用
        player.stop();
    }
}
