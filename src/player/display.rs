//! 显示调度
//!
//! 显示线程（或协作模式的调用方）按 [`FrameTimer`] 给出的节奏从画面环形缓冲取帧，
//! 写入 [`PresentationSink`]，并在显示时刻设置视频时钟。

use crate::core::{PlayerConfig, Rect, Result, SubtitleFrame, VideoImage};
use crate::player::picture_queue::{PictureQueue, ReadyPicture, SubtitleQueue};
use crate::player::sync::{ClockModel, FrameTimer};
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 没有视频或暂停时的轮询间隔
pub const IDLE_REFRESH: Duration = Duration::from_millis(100);

/// 显示接收端（窗口、纹理、帧缓冲……）
pub trait PresentationSink: Send {
    /// 可绘制区域大小
    fn surface_size(&self) -> (u32, u32);

    fn lock(&mut self) -> Result<()> {
        Ok(())
    }

    /// 把图像缩放写入 `rect`
    fn blit(&mut self, rect: Rect, image: &VideoImage) -> Result<()>;

    fn unlock(&mut self) -> Result<()> {
        Ok(())
    }

    /// 当前应显示的字幕（`None` 表示清除）
    fn show_subtitle(&mut self, _subtitle: Option<&SubtitleFrame>) {}
}

/// 丢弃画面，只记录统计（无窗口环境）
#[derive(Debug, Clone)]
pub struct NullSink {
    width: u32,
    height: u32,
    pub frames: u64,
    pub last_rect: Option<Rect>,
    pub last_luma: Option<u8>,
    pub last_subtitle: Option<String>,
}

impl NullSink {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frames: 0,
            last_rect: None,
            last_luma: None,
            last_subtitle: None,
        }
    }
}

impl PresentationSink for NullSink {
    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn blit(&mut self, rect: Rect, image: &VideoImage) -> Result<()> {
        self.frames += 1;
        self.last_rect = Some(rect);
        self.last_luma = image.planes.first().and_then(|y| y.first().copied());
        Ok(())
    }

    fn show_subtitle(&mut self, subtitle: Option<&SubtitleFrame>) {
        self.last_subtitle = subtitle.map(|s| s.text.clone());
    }
}

/// 保持宽高比居中放入 `surface`（上下或左右留黑边）
pub fn calculate_display_rect(surface: (u32, u32), picture: (u32, u32)) -> Rect {
    let (sw, sh) = surface;
    let (pw, ph) = picture;
    if sw == 0 || sh == 0 || pw == 0 || ph == 0 {
        return Rect {
            x: 0,
            y: 0,
            width: sw,
            height: sh,
        };
    }

    let aspect = pw as f64 / ph as f64;
    let mut height = sh;
    // 宽度取偶数
    let mut width = ((height as f64 * aspect).round() as u32) & !1;
    if width > sw {
        width = sw;
        height = ((width as f64 / aspect).round() as u32) & !1;
    }
    let width = width.max(1);
    let height = height.max(1);
    Rect {
        x: ((sw - width) / 2) as i32,
        y: ((sh - height) / 2) as i32,
        width,
        height,
    }
}

/// 单次显示步的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshOutcome {
    /// 本次是否显示了一帧
    pub displayed: bool,
    /// 距下一次刷新的等待时间
    pub next_delay: Duration,
}

struct SchedulerState {
    timer: FrameTimer,
    next_refresh: Instant,
    paused_since: Option<Instant>,
}

/// 显示调度器；内部互斥锁串行化所有显示步
pub struct DisplayScheduler {
    state: Mutex<SchedulerState>,
    epoch: Instant,
    clocks: Arc<ClockModel>,
    flushed: Arc<AtomicBool>,
    min_refresh_delay: f64,
}

impl DisplayScheduler {
    pub fn new(clocks: Arc<ClockModel>, flushed: Arc<AtomicBool>, config: &PlayerConfig) -> Self {
        let epoch = Instant::now();
        Self {
            state: Mutex::new(SchedulerState {
                timer: FrameTimer::new(0.0, config),
                next_refresh: epoch,
                paused_since: None,
            }),
            epoch,
            clocks,
            flushed,
            min_refresh_delay: config.min_refresh_delay,
        }
    }

    fn seconds(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.epoch).as_secs_f64()
    }

    /// 暂停：记录开始时刻
    pub fn pause_at(&self, now: Instant) {
        let mut state = self.state.lock();
        state.paused_since.get_or_insert(now);
    }

    /// 恢复：计时器顺延暂停的时长
    pub fn resume_at(&self, now: Instant) {
        let mut state = self.state.lock();
        if let Some(since) = state.paused_since.take() {
            let paused_for = now.saturating_duration_since(since).as_secs_f64();
            state.timer.shift(paused_for);
            state.next_refresh = now;
        }
    }

    /// 显示一帧：取出最早的画面，写入接收端，设置视频时钟并计算下一帧的等待时间
    pub fn refresh(
        &self,
        sink: &mut dyn PresentationSink,
        pictures: &PictureQueue,
        subtitles: Option<&SubtitleQueue>,
    ) -> RefreshOutcome {
        let mut state = self.state.lock();
        let now = Instant::now();
        let outcome = self.refresh_locked(&mut state, now, sink, pictures, subtitles);
        state.next_refresh = now + outcome.next_delay;
        outcome
    }

    /// 到期才执行显示步（协作模式）
    pub fn refresh_if_due(
        &self,
        sink: &mut dyn PresentationSink,
        pictures: &PictureQueue,
        subtitles: Option<&SubtitleQueue>,
    ) -> Option<RefreshOutcome> {
        let mut state = self.state.lock();
        let now = Instant::now();
        if now < state.next_refresh {
            return None;
        }
        let outcome = self.refresh_locked(&mut state, now, sink, pictures, subtitles);
        state.next_refresh = now + outcome.next_delay;
        Some(outcome)
    }

    fn refresh_locked(
        &self,
        state: &mut SchedulerState,
        now: Instant,
        sink: &mut dyn PresentationSink,
        pictures: &PictureQueue,
        subtitles: Option<&SubtitleQueue>,
    ) -> RefreshOutcome {
        if state.paused_since.is_some() {
            return RefreshOutcome {
                displayed: false,
                next_delay: IDLE_REFRESH,
            };
        }
        let now_secs = self.seconds(now);
        if self.flushed.swap(false, Ordering::SeqCst) {
            state.timer.reset(now_secs);
        }

        let Some(picture) = pictures.pop() else {
            return RefreshOutcome {
                displayed: false,
                next_delay: Duration::from_secs_f64(self.min_refresh_delay),
            };
        };

        self.clocks.set_video_clock_at(picture.pts, now);
        let master_diff = if self.clocks.video_is_master() {
            None
        } else {
            Some(picture.pts - self.clocks.get_master_clock_at(now))
        };
        let delay = state.timer.compute_delay(picture.pts, master_diff, now_secs);

        if let Err(e) = present(sink, &picture) {
            warn!("⚠️ 显示画面失败: {}", e);
        }
        if let Some(subtitles) = subtitles {
            let current = subtitles.current_at(picture.pts);
            sink.show_subtitle(current.as_ref());
        }

        debug!("🖼 显示 pts={:.3}s, 下一帧等待 {:.3}s", picture.pts, delay);
        RefreshOutcome {
            displayed: true,
            next_delay: Duration::from_secs_f64(delay.max(0.0)),
        }
    }
}

fn present(sink: &mut dyn PresentationSink, picture: &ReadyPicture) -> Result<()> {
    let rect = calculate_display_rect(sink.surface_size(), (picture.image.width, picture.image.height));
    sink.lock()?;
    let blit = sink.blit(rect, &picture.image);
    sink.unlock()?;
    blit
}
