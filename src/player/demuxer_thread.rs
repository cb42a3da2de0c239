use crate::core::{Packet, PlayerError, Result, StreamKind, TimeBase};
use crate::player::demuxer_source::{DemuxerSource, SeekDirection};
use crate::player::packet_queue::PacketQueue;
use crate::player::picture_queue::DecodedBuffer;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::process;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// Seek 请求（微秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    pub target_us: i64,
    pub direction: SeekDirection,
}

/// Demuxer 线程命令
#[derive(Debug)]
pub enum DemuxerCommand {
    Seek(SeekRequest),
    Pause(bool),
    Stop,
}

/// Demuxer 线程上报的事件
#[derive(Debug, Clone, PartialEq)]
pub enum DemuxerEvent {
    SeekDone { target_us: i64 },
    SeekFailed { target_us: i64, error: String },
    EndOfFile,
    ReadError(String),
}

/// 一条活动流的分发目标
#[derive(Clone)]
pub struct Route {
    pub index: usize,
    pub kind: StreamKind,
    pub time_base: TimeBase,
    pub queue: Arc<PacketQueue>,
    /// 解码端的输出缓冲，Seek 成功时和包队列一起作废
    pub decoded: Option<Arc<dyn DecodedBuffer>>,
    /// 字节数超过该值时暂停读包
    pub max_bytes: usize,
}

/// 流序号 → 包队列 的路由表，流打开/关闭时更新
pub struct RouteTable {
    routes: Mutex<Vec<Route>>,
    // 与队列共享，保证空间通知通道不会断开
    space_tx: Sender<()>,
}

impl RouteTable {
    /// 返回路由表和空间通知的接收端
    pub fn new() -> (Self, Receiver<()>) {
        let (space_tx, space_rx) = bounded(1);
        (
            Self {
                routes: Mutex::new(Vec::new()),
                space_tx,
            },
            space_rx,
        )
    }

    pub fn space_notifier(&self) -> Sender<()> {
        self.space_tx.clone()
    }

    pub fn insert(&self, route: Route) {
        let mut routes = self.routes.lock();
        routes.retain(|r| r.kind != route.kind);
        routes.push(route);
    }

    pub fn remove(&self, kind: StreamKind) -> Option<Route> {
        let mut routes = self.routes.lock();
        let pos = routes.iter().position(|r| r.kind == kind)?;
        Some(routes.remove(pos))
    }

    pub fn route_of(&self, kind: StreamKind) -> Option<Route> {
        self.routes.lock().iter().find(|r| r.kind == kind).cloned()
    }

    pub fn queue_for(&self, stream_index: usize) -> Option<(StreamKind, Arc<PacketQueue>)> {
        self.routes
            .lock()
            .iter()
            .find(|r| r.index == stream_index)
            .map(|r| (r.kind, r.queue.clone()))
    }

    pub fn snapshot(&self) -> Vec<Route> {
        self.routes.lock().clone()
    }

    /// Seek 参照流：视频 > 音频 > 字幕
    pub fn seek_stream(&self) -> Option<(usize, TimeBase)> {
        let routes = self.routes.lock();
        [StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle]
            .iter()
            .find_map(|kind| routes.iter().find(|r| r.kind == *kind))
            .map(|r| (r.index, r.time_base))
    }

    /// 是否有队列超过字节上限
    pub fn any_over_limit(&self) -> bool {
        self.routes.lock().iter().any(|r| r.queue.size() > r.max_bytes)
    }
}

/// 单次迭代的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStep {
    /// 读到并分发了一个包
    Continue,
    /// 背压、EOF、暂停或读错误：本次没有读包
    Waiting,
    Exit,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DemuxStats {
    pub packets: usize,
    pub video: usize,
    pub audio: usize,
    pub subtitle: usize,
    pub discarded: usize,
}

const LOG_FIRST_N: usize = 5;

/// 解封装分发器：读包并按流序号投递到各包队列，处理暂停/Seek/背压/EOF
pub struct Dispatcher {
    source: Box<dyn DemuxerSource>,
    routes: Arc<RouteTable>,
    command_rx: Receiver<DemuxerCommand>,
    space_rx: Receiver<()>,
    event_tx: Sender<DemuxerEvent>,
    io_retry_delay: Duration,
    paused: bool,
    last_paused: bool,
    seek_req: Option<SeekRequest>,
    abort_request: bool,
    eof: bool,
    stats: DemuxStats,
}

impl Dispatcher {
    pub fn new(
        source: Box<dyn DemuxerSource>,
        routes: Arc<RouteTable>,
        command_rx: Receiver<DemuxerCommand>,
        space_rx: Receiver<()>,
        event_tx: Sender<DemuxerEvent>,
        io_retry_delay: Duration,
    ) -> Self {
        Self {
            source,
            routes,
            command_rx,
            space_rx,
            event_tx,
            io_retry_delay,
            paused: false,
            last_paused: false,
            seek_req: None,
            abort_request: false,
            eof: false,
            stats: DemuxStats::default(),
        }
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    pub fn source(&self) -> &dyn DemuxerSource {
        self.source.as_ref()
    }

    fn handle_command(&mut self, cmd: DemuxerCommand) {
        match cmd {
            DemuxerCommand::Seek(req) => {
                if let Some(prev) = self.seek_req.replace(req) {
                    debug!("{} ⏩ 合并 Seek 请求: {}µs → {}µs", log_ctx(), prev.target_us, req.target_us);
                } else {
                    info!("{} ⏩ Demuxer 线程收到 Seek 命令: {}µs", log_ctx(), req.target_us);
                }
            }
            DemuxerCommand::Pause(paused) => self.paused = paused,
            DemuxerCommand::Stop => {
                info!("{} ⏹ Demuxer 线程收到停止命令", log_ctx());
                self.abort_request = true;
            }
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.command_rx.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.abort_request = true;
                    break;
                }
            }
        }
    }

    /// 阻塞等待下一条命令；`timeout` 到期直接返回
    fn wait_for_command(&mut self, timeout: Option<Duration>) {
        match timeout {
            None => match self.command_rx.recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => self.abort_request = true,
            },
            Some(timeout) => match self.command_rx.recv_timeout(timeout) {
                Ok(cmd) => self.handle_command(cmd),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.abort_request = true,
            },
        }
    }

    fn emit(&self, event: DemuxerEvent) {
        let _ = self.event_tx.try_send(event);
    }

    /// 一次迭代：命令 → 暂停切换 → Seek → 背压 → EOF → 读包分发
    ///
    /// `blocking` 为假时任何需要等待的情况都立即返回 [`DispatchStep::Waiting`]。
    pub fn step(&mut self, blocking: bool) -> DispatchStep {
        self.drain_commands();
        if self.abort_request {
            return DispatchStep::Exit;
        }

        if self.paused != self.last_paused {
            self.last_paused = self.paused;
            if self.paused {
                self.source.pause();
            } else {
                self.source.play();
            }
        }
        if self.paused && !self.source.reads_while_paused() && self.seek_req.is_none() {
            if blocking {
                self.wait_for_command(None);
            }
            return DispatchStep::Waiting;
        }

        if let Some(req) = self.seek_req.take() {
            self.do_seek(req);
        }

        if self.routes.any_over_limit() {
            if blocking {
                let (command_rx, space_rx) = (self.command_rx.clone(), self.space_rx.clone());
                select! {
                    recv(command_rx) -> cmd => match cmd {
                        Ok(cmd) => self.handle_command(cmd),
                        Err(_) => self.abort_request = true,
                    },
                    recv(space_rx) -> _ => {}
                }
            }
            return DispatchStep::Waiting;
        }

        if self.eof {
            if blocking {
                self.wait_for_command(None);
            }
            return DispatchStep::Waiting;
        }

        match self.source.read_packet() {
            Ok(Some(packet)) => {
                self.route_packet(packet);
                DispatchStep::Continue
            }
            Ok(None) => {
                self.on_eof();
                DispatchStep::Waiting
            }
            Err(e) => {
                warn!("{} ⚠️ 读取包失败，稍后重试: {}", log_ctx(), e);
                self.emit(DemuxerEvent::ReadError(e.to_string()));
                if blocking {
                    self.wait_for_command(Some(self.io_retry_delay));
                }
                DispatchStep::Waiting
            }
        }
    }

    fn do_seek(&mut self, req: SeekRequest) {
        let (stream_index, timestamp) = match self.routes.seek_stream() {
            Some((index, time_base)) => (Some(index), time_base.rescale(req.target_us, TimeBase::MICROS)),
            None => (None, req.target_us),
        };

        match self.source.seek(stream_index, timestamp, req.direction) {
            Ok(()) => {
                for route in self.routes.snapshot() {
                    route.queue.flush();
                    // 先作废已解码数据再注入标记，解码端处理标记后才恢复接收
                    if let Some(decoded) = &route.decoded {
                        decoded.begin_flush();
                    }
                    if let Err(e) = route.queue.put_flush() {
                        debug!("{} {}队列无法注入 flush 标记: {}", log_ctx(), route.kind.as_str(), e);
                    }
                }
                self.eof = false;
                info!("{} 🧹 Seek 成功: {}µs，包队列已清空", log_ctx(), req.target_us);
                self.emit(DemuxerEvent::SeekDone {
                    target_us: req.target_us,
                });
            }
            Err(e) => {
                error!("{} ❌ Seek 失败: {}", log_ctx(), e);
                for route in self.routes.snapshot() {
                    if let Some(decoded) = &route.decoded {
                        decoded.cancel_flush();
                    }
                }
                self.emit(DemuxerEvent::SeekFailed {
                    target_us: req.target_us,
                    error: e.to_string(),
                });
            }
        }
    }

    fn on_eof(&mut self) {
        if self.eof {
            return;
        }
        self.eof = true;
        info!("{} 📄 Demuxer 到达文件末尾，等待命令（Seek/Stop）...", log_ctx());
        // 给视频解码器一个空包，让它吐出缓存的帧
        if let Some(route) = self.routes.route_of(StreamKind::Video) {
            if let Err(e) = route.queue.put(Packet::drain(route.index)) {
                debug!("{} 无法投递排空包: {}", log_ctx(), e);
            }
        }
        self.emit(DemuxerEvent::EndOfFile);
    }

    fn route_packet(&mut self, packet: Packet) {
        self.stats.packets += 1;
        let Some((kind, queue)) = self.routes.queue_for(packet.stream_index) else {
            self.stats.discarded += 1;
            return;
        };

        let count = match kind {
            StreamKind::Video => {
                self.stats.video += 1;
                self.stats.video
            }
            StreamKind::Audio => {
                self.stats.audio += 1;
                self.stats.audio
            }
            StreamKind::Subtitle => {
                self.stats.subtitle += 1;
                self.stats.subtitle
            }
        };
        if count <= LOG_FIRST_N || count % 100 == 0 {
            debug!(
                "{} 📦 Demuxer 读取{}包 #{}（total packets {}）",
                log_ctx(),
                kind.as_str(),
                count,
                self.stats.packets
            );
        }

        match queue.put(packet) {
            Ok(()) => {}
            Err(PlayerError::QueueFull(n)) => {
                warn!("{} ⚠️ {}包队列已满 ({} 个)，丢弃数据包", log_ctx(), kind.as_str(), n);
                self.stats.discarded += 1;
            }
            Err(_) => {
                // 流正在关闭
                self.stats.discarded += 1;
            }
        }
    }

    /// 线程主循环
    pub fn run(mut self) -> DemuxStats {
        info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), self.source.description());
        while self.step(true) != DispatchStep::Exit {}
        info!(
            "{} 🛑 Demuxer 线程退出（共读取 {} 个包：{} 视频，{} 音频，{} 字幕，丢弃 {}）",
            log_ctx(),
            self.stats.packets,
            self.stats.video,
            self.stats.audio,
            self.stats.subtitle,
            self.stats.discarded
        );
        self.stats
    }
}

/// Demuxer 线程句柄
pub struct DemuxerThread {
    thread_handle: Option<JoinHandle<DemuxStats>>,
    command_tx: Sender<DemuxerCommand>,
}

impl DemuxerThread {
    /// 在独立线程中运行分发器
    pub fn start(dispatcher: Dispatcher, command_tx: Sender<DemuxerCommand>) -> Result<Self> {
        let thread_handle = thread::Builder::new()
            .name("demuxer".to_string())
            .spawn(move || dispatcher.run())
            .map_err(PlayerError::IoError)?;
        Ok(Self {
            thread_handle: Some(thread_handle),
            command_tx,
        })
    }

    /// 发送 Stop 命令并等待线程退出
    pub fn stop(&mut self) -> Option<DemuxStats> {
        let handle = self.thread_handle.take()?;
        info!("{} 🛑 DemuxerThread::stop() called", log_ctx());
        let _ = self.command_tx.send(DemuxerCommand::Stop);
        match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                error!("{} ❌ Demuxer 线程异常退出", log_ctx());
                None
            }
        }
    }
}

impl Drop for DemuxerThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ DemuxerThread 被 drop，但可能未调用 stop()，正在尝试优雅停止", log_ctx());
            self.stop();
        }
    }
}
