//! 线程安全的压缩包 FIFO
//!
//! - 每个队列自带锁和条件变量，既保护修改，也用于阻塞 `get`
//! - `abort()` 单调生效：唤醒所有等待者，之后的阻塞 `get` 立即返回 `Aborted`
//! - `flush()` 只清空内容，不销毁同步原语，之后队列可继续使用
//! - Seek 后注入 [`QueuedPacket::Flush`]，解码端据此重置解码器

use crate::core::{Packet, PlayerError, QueuedPacket, Result, StreamKind};
use crossbeam_channel::Sender;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// `get` 的结果
#[derive(Debug, PartialEq)]
pub enum QueueGet {
    Item(QueuedPacket),
    Empty,
    Aborted,
}

struct QueueState {
    packets: VecDeque<QueuedPacket>,
    size: usize,
    abort_request: bool,
}

pub struct PacketQueue {
    kind: StreamKind,
    state: Mutex<QueueState>,
    cond: Condvar,
    max_packets: usize,
    // 出队时通知解封装线程（背压等待用）
    space_notifier: Option<Sender<()>>,
}

impl PacketQueue {
    pub fn new(kind: StreamKind, max_packets: usize) -> Self {
        Self {
            kind,
            state: Mutex::new(QueueState {
                packets: VecDeque::new(),
                size: 0,
                abort_request: false,
            }),
            cond: Condvar::new(),
            max_packets,
            space_notifier: None,
        }
    }

    /// 出队/清空/中止时向 `tx` 投递一个唤醒信号（满则丢弃）
    pub fn with_space_notifier(mut self, tx: Sender<()>) -> Self {
        self.space_notifier = Some(tx);
        self
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// 入队数据包
    pub fn put(&self, packet: Packet) -> Result<()> {
        self.put_entry(QueuedPacket::Data(packet))
    }

    /// 注入 flush 标记
    pub fn put_flush(&self) -> Result<()> {
        self.put_entry(QueuedPacket::Flush)
    }

    fn put_entry(&self, entry: QueuedPacket) -> Result<()> {
        let mut state = self.state.lock();
        if state.abort_request {
            return Err(PlayerError::Aborted);
        }
        if state.packets.len() >= self.max_packets {
            return Err(PlayerError::QueueFull(state.packets.len()));
        }
        state.size += entry.size();
        state.packets.push_back(entry);
        drop(state);
        self.cond.notify_one();
        Ok(())
    }

    /// 出队；`blocking` 时等待数据或中止
    pub fn get(&self, blocking: bool) -> QueueGet {
        let mut state = self.state.lock();
        loop {
            if state.abort_request {
                return QueueGet::Aborted;
            }
            if let Some(entry) = state.packets.pop_front() {
                state.size -= entry.size();
                drop(state);
                self.notify_space();
                return QueueGet::Item(entry);
            }
            if !blocking {
                return QueueGet::Empty;
            }
            self.cond.wait(&mut state);
        }
    }

    /// 丢弃所有内容，size/count 归零
    pub fn flush(&self) {
        let dropped = {
            let mut state = self.state.lock();
            let dropped = state.packets.len();
            state.packets.clear();
            state.size = 0;
            dropped
        };
        if dropped > 0 {
            debug!("🧹 清空{}包队列: {} 个包", self.kind.as_str(), dropped);
        }
        self.notify_space();
    }

    /// 中止（幂等），唤醒所有阻塞的 `get`
    pub fn abort(&self) {
        self.state.lock().abort_request = true;
        self.cond.notify_all();
        self.notify_space();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().abort_request
    }

    /// 队列中所有包的字节总数
    pub fn size(&self) -> usize {
        self.state.lock().size
    }

    /// 队列中的条目数
    pub fn count(&self) -> usize {
        self.state.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// 销毁队列，释放剩余的包
    pub fn destroy(self) -> usize {
        let state = self.state.into_inner();
        state.packets.len()
    }

    fn notify_space(&self) {
        if let Some(tx) = &self.space_notifier {
            let _ = tx.try_send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn packet(pts: i64, size: usize) -> Packet {
        Packet::new(0, Some(pts), Some(pts), vec![0u8; size])
    }

    #[test]
    fn test_fifo_order_and_size() {
        let q = PacketQueue::new(StreamKind::Video, 100);
        q.put(packet(1, 10)).unwrap();
        q.put(packet(2, 20)).unwrap();
        q.put(packet(3, 30)).unwrap();
        assert_eq!(q.size(), 60);
        assert_eq!(q.count(), 3);

        let mut expected_size = 60;
        for pts in 1..=3 {
            match q.get(false) {
                QueueGet::Item(QueuedPacket::Data(p)) => {
                    assert_eq!(p.pts, Some(pts));
                    expected_size -= p.size();
                    assert_eq!(q.size(), expected_size);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(q.get(false), QueueGet::Empty);
    }

    #[test]
    fn test_flush_then_get_is_empty() {
        let q = PacketQueue::new(StreamKind::Audio, 100);
        q.put(packet(1, 10)).unwrap();
        q.put(packet(2, 10)).unwrap();
        q.flush();
        assert_eq!(q.get(false), QueueGet::Empty);
        assert_eq!(q.count(), 0);
        assert_eq!(q.size(), 0);

        // flush 后可继续使用
        q.put_flush().unwrap();
        q.put(packet(5, 4)).unwrap();
        assert_eq!(q.get(false), QueueGet::Item(QueuedPacket::Flush));
        assert!(matches!(q.get(false), QueueGet::Item(QueuedPacket::Data(_))));
    }

    #[test]
    fn test_abort_wakes_blocked_get() {
        let q = Arc::new(PacketQueue::new(StreamKind::Video, 100));
        let q2 = q.clone();
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let result = q2.get(true);
            (result, start.elapsed())
        });
        thread::sleep(Duration::from_millis(50));
        q.abort();
        let (result, elapsed) = waiter.join().unwrap();
        assert_eq!(result, QueueGet::Aborted);
        assert!(elapsed < Duration::from_secs(2));

        // 之后的阻塞 get 立即返回
        assert_eq!(q.get(true), QueueGet::Aborted);
        q.abort();
        assert!(q.is_aborted());
    }

    #[test]
    fn test_abort_wins_over_queued_data() {
        let q = PacketQueue::new(StreamKind::Video, 100);
        q.put(packet(1, 10)).unwrap();
        q.abort();
        assert_eq!(q.get(true), QueueGet::Aborted);
        assert!(matches!(q.put(packet(2, 10)), Err(PlayerError::Aborted)));
    }

    #[test]
    fn test_blocking_get_receives_later_put() {
        let q = Arc::new(PacketQueue::new(StreamKind::Subtitle, 100));
        let q2 = q.clone();
        let waiter = thread::spawn(move || q2.get(true));
        thread::sleep(Duration::from_millis(20));
        q.put(packet(7, 3)).unwrap();
        match waiter.join().unwrap() {
            QueueGet::Item(QueuedPacket::Data(p)) => assert_eq!(p.pts, Some(7)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_put_full_error() {
        let q = PacketQueue::new(StreamKind::Audio, 2);
        q.put(packet(1, 1)).unwrap();
        q.put(packet(2, 1)).unwrap();
        assert!(matches!(q.put(packet(3, 1)), Err(PlayerError::QueueFull(2))));
        assert_eq!(q.count(), 2);
        assert_eq!(q.destroy(), 2);
    }

    #[test]
    fn test_space_notifier_fires_on_get() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let q = PacketQueue::new(StreamKind::Video, 10).with_space_notifier(tx);
        q.put(packet(1, 1)).unwrap();
        assert!(rx.try_recv().is_err());
        let _ = q.get(false);
        assert!(rx.try_recv().is_ok());
    }
}
