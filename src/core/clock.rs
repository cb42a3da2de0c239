use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 播放时钟 - 记录 (值, 采样时刻)，按墙钟外推
///
/// 暂停时冻结在暂停瞬间的值，恢复后从该值继续走。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_value: f64,       // 基准值（秒）
    base_instant: Instant, // 基准时刻
    paused: bool,
    paused_at: f64, // 暂停时的位置
}

impl ClockInner {
    fn value_at(&self, now: Instant) -> f64 {
        if self.paused {
            self.paused_at
        } else {
            let elapsed = now.saturating_duration_since(self.base_instant).as_secs_f64();
            self.base_value + elapsed
        }
    }
}

impl PlaybackClock {
    /// 新建时钟，初始为运行状态、值为 0
    pub fn new() -> Self {
        Self::new_at(Instant::now())
    }

    pub fn new_at(now: Instant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_value: 0.0,
                base_instant: now,
                paused: false,
                paused_at: 0.0,
            })),
        }
    }

    /// 获取当前时钟值（秒）
    pub fn get(&self) -> f64 {
        self.get_at(Instant::now())
    }

    pub fn get_at(&self, now: Instant) -> f64 {
        self.inner.lock().value_at(now)
    }

    /// 设置时钟值，采样时刻为现在
    pub fn set(&self, value: f64) {
        self.set_at(value, Instant::now());
    }

    pub fn set_at(&self, value: f64, at: Instant) {
        let mut inner = self.inner.lock();
        inner.base_value = value;
        inner.base_instant = at;
        inner.paused_at = value;
    }

    /// 恢复走时，从冻结的值继续
    pub fn play(&self) {
        self.play_at(Instant::now());
    }

    pub fn play_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_value = inner.paused_at;
            inner.base_instant = now;
            inner.paused = false;
        }
    }

    /// 暂停走时
    pub fn pause(&self) {
        self.pause_at(Instant::now());
    }

    pub fn pause_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = inner.value_at(now);
            inner.paused = true;
        }
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_extrapolates() {
        let t0 = Instant::now();
        let clock = PlaybackClock::new_at(t0);
        clock.set_at(3.0, t0);
        let v = clock.get_at(t0 + Duration::from_millis(500));
        assert!((v - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_clock_freezes_while_paused() {
        let t0 = Instant::now();
        let clock = PlaybackClock::new_at(t0);
        clock.set_at(1.0, t0);
        clock.pause_at(t0 + Duration::from_secs(1));
        assert!((clock.get_at(t0 + Duration::from_secs(5)) - 2.0).abs() < 1e-9);

        clock.play_at(t0 + Duration::from_secs(5));
        let v = clock.get_at(t0 + Duration::from_secs(6));
        assert!((v - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_while_paused_holds_value() {
        let clock = PlaybackClock::new();
        clock.pause();
        clock.set(10.0);
        assert!(clock.is_paused());
        assert!((clock.get() - 10.0).abs() < 1e-9);
    }
}
