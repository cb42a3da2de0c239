//! 音画同步
//!
//! - [`ClockModel`]：音频/视频/外部三个时钟以及主时钟选择
//! - [`VideoClock`]：解码端的视频时钟推算（无 pts 时按帧时长外推）
//! - [`AudioSync`]：视频/外部为主时钟时，按滑动平均的差值微调音频缓冲长度
//! - [`FrameTimer`]：每显示一帧计算下一帧的等待时间，落后则立即显示，超前则加倍等待

use crate::core::{AudioParams, PlaybackClock, PlayerConfig, StreamKind, SyncType};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// 三个时钟 + 主时钟选择，在各线程间共享
pub struct ClockModel {
    sync_type: SyncType,
    audio: PlaybackClock,
    video: PlaybackClock,
    external: PlaybackClock,
    has_audio: AtomicBool,
    has_video: AtomicBool,
    paused: AtomicBool,
}

impl ClockModel {
    pub fn new(sync_type: SyncType) -> Self {
        Self::new_at(sync_type, Instant::now())
    }

    pub fn new_at(sync_type: SyncType, now: Instant) -> Self {
        Self {
            sync_type,
            audio: PlaybackClock::new_at(now),
            video: PlaybackClock::new_at(now),
            external: PlaybackClock::new_at(now),
            has_audio: AtomicBool::new(false),
            has_video: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    /// 流打开/关闭时更新存在标记，主时钟据此回退
    pub fn set_stream_present(&self, kind: StreamKind, present: bool) {
        match kind {
            StreamKind::Audio => self.has_audio.store(present, Ordering::SeqCst),
            StreamKind::Video => self.has_video.store(present, Ordering::SeqCst),
            StreamKind::Subtitle => {}
        }
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio.load(Ordering::SeqCst)
    }

    pub fn has_video(&self) -> bool {
        self.has_video.load(Ordering::SeqCst)
    }

    pub fn get_audio_clock(&self) -> f64 {
        self.audio.get()
    }

    pub fn get_video_clock(&self) -> f64 {
        self.video.get()
    }

    pub fn get_external_clock(&self) -> f64 {
        self.external.get()
    }

    pub fn get_audio_clock_at(&self, now: Instant) -> f64 {
        self.audio.get_at(now)
    }

    pub fn get_video_clock_at(&self, now: Instant) -> f64 {
        self.video.get_at(now)
    }

    pub fn get_external_clock_at(&self, now: Instant) -> f64 {
        self.external.get_at(now)
    }

    /// 主时钟；名义主流不存在时回退到另一条流的时钟
    pub fn get_master_clock(&self) -> f64 {
        self.get_master_clock_at(Instant::now())
    }

    pub fn get_master_clock_at(&self, now: Instant) -> f64 {
        match self.sync_type {
            SyncType::VideoMaster => {
                if self.has_video() || !self.has_audio() {
                    self.get_video_clock_at(now)
                } else {
                    self.get_audio_clock_at(now)
                }
            }
            SyncType::AudioMaster => {
                if self.has_audio() || !self.has_video() {
                    self.get_audio_clock_at(now)
                } else {
                    self.get_video_clock_at(now)
                }
            }
            SyncType::ExternalMaster => self.get_external_clock_at(now),
        }
    }

    /// 音频是否为实际生效的主时钟
    pub fn audio_is_master(&self) -> bool {
        match self.sync_type {
            SyncType::AudioMaster => self.has_audio() || !self.has_video(),
            SyncType::VideoMaster => !self.has_video() && self.has_audio(),
            SyncType::ExternalMaster => false,
        }
    }

    pub fn video_is_master(&self) -> bool {
        match self.sync_type {
            SyncType::VideoMaster => self.has_video() || !self.has_audio(),
            SyncType::AudioMaster => !self.has_audio() && self.has_video(),
            SyncType::ExternalMaster => false,
        }
    }

    /// 音频回调写出数据后设置音频时钟
    pub fn set_audio_clock_at(&self, value: f64, at: Instant) {
        self.audio.set_at(value, at);
    }

    /// 显示一帧时设置视频时钟
    pub fn set_video_clock_at(&self, value: f64, at: Instant) {
        self.video.set_at(value, at);
    }

    pub fn set_external_clock_at(&self, value: f64, at: Instant) {
        self.external.set_at(value, at);
    }

    /// Seek 后把所有时钟对齐到目标位置
    pub fn reset_all_at(&self, value: f64, at: Instant) {
        self.audio.set_at(value, at);
        self.video.set_at(value, at);
        self.external.set_at(value, at);
    }

    pub fn pause_at(&self, now: Instant) {
        self.paused.store(true, Ordering::SeqCst);
        self.audio.pause_at(now);
        self.video.pause_at(now);
        self.external.pause_at(now);
    }

    pub fn resume_at(&self, now: Instant) {
        self.paused.store(false, Ordering::SeqCst);
        self.audio.play_at(now);
        self.video.play_at(now);
        self.external.play_at(now);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// 解码端视频时钟
#[derive(Debug, Clone)]
pub struct VideoClock {
    clock: f64,
    frame_duration: f64,
}

impl VideoClock {
    /// `frame_duration` 为编码器声明的帧时长（秒）
    pub fn new(frame_duration: f64) -> Self {
        Self {
            clock: 0.0,
            frame_duration,
        }
    }

    pub fn value(&self) -> f64 {
        self.clock
    }

    pub fn reset(&mut self, value: f64) {
        self.clock = value;
    }

    /// 有 pts（非零）则对齐到 pts，否则用推算值；然后按帧时长前进，
    /// 每个重复场额外加半帧。返回这一帧的 pts。
    pub fn update_video_clock(&mut self, repeat_count: u32, pts: f64) -> f64 {
        let pts = if pts != 0.0 {
            self.clock = pts;
            pts
        } else {
            self.clock
        };
        let frame_delay = self.frame_duration + repeat_count as f64 * self.frame_duration * 0.5;
        self.clock += frame_delay;
        pts
    }
}

/// 音频同步：滑动平均差值 → 缓冲长度修正
#[derive(Debug, Clone)]
pub struct AudioSync {
    params: AudioParams,
    diff_cum: f64,
    diff_avg_coef: f64,
    diff_avg_count: u32,
    diff_avg_nb: u32,
    diff_threshold: f64,
    correction_percent: u32,
    nosync_threshold: f64,
}

impl AudioSync {
    pub fn new(params: AudioParams, config: &PlayerConfig) -> Self {
        let nb = config.audio_diff_avg_nb.max(1);
        let sample_rate = params.sample_rate.max(1) as f64;
        Self {
            params,
            diff_cum: 0.0,
            // 经过 nb 次测量后权重衰减到 1%
            diff_avg_coef: (0.01f64.ln() / nb as f64).exp(),
            diff_avg_count: 0,
            diff_avg_nb: nb,
            diff_threshold: 2.0 * config.audio_buffer_size as f64 / sample_rate,
            correction_percent: config.sample_correction_percent_max,
            nosync_threshold: config.nosync_threshold,
        }
    }

    pub fn diff_cum(&self) -> f64 {
        self.diff_cum
    }

    pub fn diff_avg_count(&self) -> u32 {
        self.diff_avg_count
    }

    pub fn reset(&mut self) {
        self.diff_cum = 0.0;
        self.diff_avg_count = 0;
    }

    /// 调整 `samples`（交错 S16）使音频追上主时钟，返回新长度。
    ///
    /// `master_clock` 为 `None` 表示音频本身就是主时钟，不做修正。
    pub fn synchronize(&mut self, samples: &mut Vec<u8>, audio_clock: f64, master_clock: Option<f64>) -> usize {
        let size = samples.len();
        let Some(master) = master_clock else {
            return size;
        };
        let n = self.params.bytes_per_frame();
        if n == 0 || size < n {
            return size;
        }

        let diff = audio_clock - master;
        if diff.abs() >= self.nosync_threshold {
            // 时间戳跳变或 Seek，清零累计值，不修正
            if self.diff_avg_count > 0 || self.diff_cum != 0.0 {
                info!("🔊 音频差值 {:.3}s 超出同步范围，重置滑动平均", diff);
            }
            self.reset();
            return size;
        }

        self.diff_cum = diff + self.diff_avg_coef * self.diff_cum;
        if self.diff_avg_count < self.diff_avg_nb {
            self.diff_avg_count += 1;
            return size;
        }

        let avg_diff = self.diff_cum * (1.0 - self.diff_avg_coef);
        if avg_diff.abs() < self.diff_threshold {
            return size;
        }

        let wanted = size as i64 + (diff * self.params.sample_rate as f64) as i64 * n as i64;
        let pct = self.correction_percent as i64;
        let min_size = align_down(size as i64 * (100 - pct) / 100, n);
        let max_size = align_down(size as i64 * (100 + pct) / 100, n);
        let wanted = align_down(wanted.clamp(min_size, max_size), n) as usize;

        if wanted < size {
            samples.truncate(wanted);
        } else if wanted > size {
            let last_frame = samples[size - n..size].to_vec();
            while samples.len() < wanted {
                samples.extend_from_slice(&last_frame);
            }
            samples.truncate(wanted);
        }

        debug!(
            "🔊 音频同步: diff={:.4}s avg={:.4}s size {} → {}",
            diff,
            avg_diff,
            size,
            samples.len()
        );
        samples.len()
    }
}

fn align_down(value: i64, n: usize) -> i64 {
    let n = n as i64;
    (value / n) * n
}

/// 显示节奏控制
#[derive(Debug, Clone)]
pub struct FrameTimer {
    frame_timer: f64,
    frame_last_pts: Option<f64>,
    frame_last_delay: f64,
    sync_threshold: f64,
    nosync_threshold: f64,
    min_refresh_delay: f64,
}

impl FrameTimer {
    /// `now` 为单调时间（秒）
    pub fn new(now: f64, config: &PlayerConfig) -> Self {
        Self {
            frame_timer: now,
            frame_last_pts: None,
            frame_last_delay: 0.04,
            sync_threshold: config.sync_threshold,
            nosync_threshold: config.nosync_threshold,
            min_refresh_delay: config.min_refresh_delay,
        }
    }

    pub fn frame_timer(&self) -> f64 {
        self.frame_timer
    }

    pub fn last_delay(&self) -> f64 {
        self.frame_last_delay
    }

    /// Seek 或首帧：下一帧不与旧 pts 比较
    pub fn reset(&mut self, now: f64) {
        self.frame_timer = now;
        self.frame_last_pts = None;
    }

    /// 恢复播放时把暂停期间的时长补进计时器
    pub fn shift(&mut self, paused_for: f64) {
        self.frame_timer += paused_for;
    }

    /// 计算显示 `pts` 这一帧之后应等待的秒数。
    ///
    /// `master_diff` 为 `Some(pts - master_clock)` 表示视频从属于其他时钟。
    pub fn compute_delay(&mut self, pts: f64, master_diff: Option<f64>, now: f64) -> f64 {
        let mut delay = match self.frame_last_pts {
            Some(last) => pts - last,
            None => self.frame_last_delay,
        };
        if delay <= 0.0 || delay >= 10.0 {
            // 时间戳异常，沿用上一帧的间隔
            delay = self.frame_last_delay;
        }
        self.frame_last_delay = delay;
        self.frame_last_pts = Some(pts);

        if let Some(diff) = master_diff {
            let sync_threshold = delay.max(self.sync_threshold);
            if diff.abs() < self.nosync_threshold {
                if diff <= -sync_threshold {
                    delay = 0.0;
                } else if diff >= sync_threshold {
                    delay *= 2.0;
                }
            }
        }

        self.frame_timer += delay;
        let actual_delay = self.frame_timer - now;
        actual_delay.max(self.min_refresh_delay)
    }
}
