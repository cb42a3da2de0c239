use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct ControlFlags {
    paused: bool,
    abort: bool,
}

/// 解码线程共享的暂停/中止状态
///
/// 暂停时解码线程在条件变量上等待，状态变化时被唤醒。
#[derive(Default)]
pub struct PlayerControl {
    flags: Mutex<ControlFlags>,
    cond: Condvar,
}

impl PlayerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paused(&self, paused: bool) {
        self.flags.lock().paused = paused;
        self.cond.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.flags.lock().paused
    }

    /// 全局中止（单调）
    pub fn abort(&self) {
        self.flags.lock().abort = true;
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.flags.lock().abort
    }

    /// 唤醒所有等待者，让它们重新检查各自的退出条件
    pub fn wake_all(&self) {
        let _guard = self.flags.lock();
        self.cond.notify_all();
    }

    /// 暂停期间阻塞；返回 `false` 表示应当退出
    pub fn wait_while_paused(&self, should_exit: impl Fn() -> bool) -> bool {
        let mut flags = self.flags.lock();
        loop {
            if flags.abort || should_exit() {
                return false;
            }
            if !flags.paused {
                return true;
            }
            self.cond.wait(&mut flags);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_resume_releases_waiter() {
        let control = Arc::new(PlayerControl::new());
        control.set_paused(true);
        let c2 = control.clone();
        let waiter = thread::spawn(move || c2.wait_while_paused(|| false));
        thread::sleep(Duration::from_millis(20));
        control.set_paused(false);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_stream_exit_releases_paused_waiter() {
        let control = Arc::new(PlayerControl::new());
        control.set_paused(true);
        let exit = Arc::new(AtomicBool::new(false));
        let (c2, e2) = (control.clone(), exit.clone());
        let waiter = thread::spawn(move || c2.wait_while_paused(|| e2.load(Ordering::SeqCst)));
        thread::sleep(Duration::from_millis(20));
        exit.store(true, Ordering::SeqCst);
        control.wake_all();
        assert!(!waiter.join().unwrap());
    }
}
