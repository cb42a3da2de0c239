//! 已解码未显示的视频帧环形缓冲
//!
//! 写指针只在入队一帧就绪画面时前进，读指针只在显示时前进；
//! 取走画面会清空槽位，同一槽内容在重新填充前不会再次显示。
//!
//! Seek 期间缓冲处于丢弃状态：从发起 Seek 到解码端处理 flush 标记之间
//! 解出的都是旧位置的数据，一律丢弃。

use crate::core::{SubtitleFrame, VideoImage};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// 环形缓冲槽
#[derive(Debug, Default)]
pub struct VideoPicture {
    pub image: Option<VideoImage>,
    pub pts: f64,
    pub width: u32,
    pub height: u32,
    pub ready: bool,
}

/// 显示端取出的画面
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyPicture {
    pub image: VideoImage,
    pub pts: f64,
}

/// 入队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureEnqueue {
    Queued,
    /// 协作模式下缓冲已满，画面被跳过
    Skipped,
    /// Seek 尚未完成，旧位置的数据被丢弃
    Discarded,
    Aborted,
}

/// 已解码数据的缓冲（画面、字幕），Seek 时随包队列一起作废
pub trait DecodedBuffer: Send + Sync {
    /// 清空并进入丢弃状态，阻塞中的写入方被唤醒
    fn begin_flush(&self);

    /// Seek 失败：不会再有 flush 标记，恢复接收
    fn cancel_flush(&self);
}

struct Ring {
    slots: Vec<VideoPicture>,
    rindex: usize,
    windex: usize,
    size: usize,
    discarding: bool,
    abort_request: bool,
}

pub struct PictureQueue {
    ring: Mutex<Ring>,
    cond: Condvar,
    capacity: usize,
}

impl PictureQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                slots: (0..capacity).map(|_| VideoPicture::default()).collect(),
                rindex: 0,
                windex: 0,
                size: 0,
                discarding: false,
                abort_request: false,
            }),
            cond: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ring.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 写入一帧；`blocking` 为真时缓冲满则等待空位、Seek 或中止，否则直接跳过
    pub fn push(&self, image: VideoImage, pts: f64, blocking: bool) -> PictureEnqueue {
        let mut ring = self.ring.lock();
        while ring.size >= self.capacity && !ring.abort_request && !ring.discarding {
            if !blocking {
                return PictureEnqueue::Skipped;
            }
            self.cond.wait(&mut ring);
        }
        if ring.abort_request {
            return PictureEnqueue::Aborted;
        }
        if ring.discarding {
            return PictureEnqueue::Discarded;
        }

        let windex = ring.windex;
        let slot = &mut ring.slots[windex];
        slot.width = image.width;
        slot.height = image.height;
        slot.image = Some(image);
        slot.pts = pts;
        slot.ready = true;

        ring.windex = (windex + 1) % self.capacity;
        ring.size += 1;
        PictureEnqueue::Queued
    }

    /// 最早的就绪画面的 pts
    pub fn peek_pts(&self) -> Option<f64> {
        let ring = self.ring.lock();
        if ring.size == 0 {
            return None;
        }
        let slot = &ring.slots[ring.rindex];
        slot.ready.then_some(slot.pts)
    }

    /// 取出最早的就绪画面，读指针前进一格
    pub fn pop(&self) -> Option<ReadyPicture> {
        let mut ring = self.ring.lock();
        if ring.size == 0 {
            return None;
        }
        let rindex = ring.rindex;
        let slot = &mut ring.slots[rindex];
        let image = slot.image.take();
        slot.ready = false;
        let pts = slot.pts;

        ring.rindex = (rindex + 1) % self.capacity;
        ring.size -= 1;
        drop(ring);
        self.cond.notify_one();

        image.map(|image| ReadyPicture { image, pts })
    }

    /// 丢弃所有画面并恢复接收（解码端处理 flush 标记时调用）
    pub fn clear(&self) {
        self.reset(false);
    }

    pub fn is_discarding(&self) -> bool {
        self.ring.lock().discarding
    }

    fn reset(&self, discarding: bool) {
        let mut ring = self.ring.lock();
        for slot in ring.slots.iter_mut() {
            slot.image = None;
            slot.ready = false;
        }
        ring.rindex = 0;
        ring.windex = 0;
        ring.size = 0;
        ring.discarding = discarding;
        drop(ring);
        self.cond.notify_all();
    }

    pub fn abort(&self) {
        self.ring.lock().abort_request = true;
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.ring.lock().abort_request
    }
}

impl DecodedBuffer for PictureQueue {
    fn begin_flush(&self) {
        self.reset(true);
    }

    fn cancel_flush(&self) {
        self.ring.lock().discarding = false;
    }
}

/// 已解码的字幕队列（有界）
pub struct SubtitleQueue {
    state: Mutex<SubtitleState>,
    cond: Condvar,
    capacity: usize,
}

struct SubtitleState {
    frames: VecDeque<SubtitleFrame>,
    discarding: bool,
    abort_request: bool,
}

impl SubtitleQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SubtitleState {
                frames: VecDeque::new(),
                discarding: false,
                abort_request: false,
            }),
            cond: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// 写入一条字幕；满时 `blocking` 等待显示端消费、Seek 或中止，否则丢弃
    pub fn push(&self, frame: SubtitleFrame, blocking: bool) -> PictureEnqueue {
        let mut state = self.state.lock();
        while state.frames.len() >= self.capacity && !state.abort_request && !state.discarding {
            if !blocking {
                return PictureEnqueue::Skipped;
            }
            self.cond.wait(&mut state);
        }
        if state.abort_request {
            return PictureEnqueue::Aborted;
        }
        if state.discarding {
            return PictureEnqueue::Discarded;
        }
        state.frames.push_back(frame);
        PictureEnqueue::Queued
    }

    /// `pts` 时刻应显示的字幕；已过期的条目被丢弃
    pub fn current_at(&self, pts: f64) -> Option<SubtitleFrame> {
        let mut state = self.state.lock();
        let before = state.frames.len();
        while state.frames.front().is_some_and(|f| f.end <= pts) {
            state.frames.pop_front();
        }
        let expired = before != state.frames.len();
        let current = state
            .frames
            .front()
            .filter(|f| f.start <= pts)
            .cloned();
        drop(state);
        if expired {
            self.cond.notify_all();
        }
        current
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清空并恢复接收（解码端处理 flush 标记时调用）
    pub fn clear(&self) {
        self.reset(false);
    }

    fn reset(&self, discarding: bool) {
        let mut state = self.state.lock();
        state.frames.clear();
        state.discarding = discarding;
        drop(state);
        self.cond.notify_all();
    }

    pub fn abort(&self) {
        self.state.lock().abort_request = true;
        self.cond.notify_all();
    }
}

impl DecodedBuffer for SubtitleQueue {
    fn begin_flush(&self) {
        self.reset(true);
    }

    fn cancel_flush(&self) {
        self.state.lock().discarding = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn image(luma: u8) -> VideoImage {
        VideoImage::solid_yuv(4, 4, luma)
    }

    #[test]
    fn test_ring_never_exceeds_capacity() {
        let q = PictureQueue::new(2);
        assert_eq!(q.push(image(1), 0.0, false), PictureEnqueue::Queued);
        assert_eq!(q.push(image(2), 0.04, false), PictureEnqueue::Queued);
        assert_eq!(q.push(image(3), 0.08, false), PictureEnqueue::Skipped);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_pop_advances_once_and_never_repeats() {
        let q = PictureQueue::new(3);
        q.push(image(1), 1.0, false);
        q.push(image(2), 2.0, false);

        let first = q.pop().unwrap();
        assert_eq!(first.pts, 1.0);
        assert_eq!(q.len(), 1);
        let second = q.pop().unwrap();
        assert_eq!(second.pts, 2.0);
        assert!(q.pop().is_none());
        assert_eq!(q.len(), 0);

        // 环绕后使用新内容
        q.push(image(3), 3.0, false);
        q.push(image(4), 4.0, false);
        assert_eq!(q.pop().unwrap().image.planes[0][0], 3);
        assert_eq!(q.pop().unwrap().image.planes[0][0], 4);
    }

    #[test]
    fn test_blocking_push_waits_for_display() {
        let q = Arc::new(PictureQueue::new(1));
        q.push(image(1), 0.0, true);
        let q2 = q.clone();
        let producer = thread::spawn(move || q2.push(image(2), 0.04, true));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop().unwrap().pts, 0.0);
        assert_eq!(producer.join().unwrap(), PictureEnqueue::Queued);
        assert_eq!(q.peek_pts(), Some(0.04));
    }

    #[test]
    fn test_abort_releases_blocked_producer() {
        let q = Arc::new(PictureQueue::new(1));
        q.push(image(1), 0.0, true);
        let q2 = q.clone();
        let producer = thread::spawn(move || q2.push(image(2), 0.04, true));
        thread::sleep(Duration::from_millis(20));
        q.abort();
        assert_eq!(producer.join().unwrap(), PictureEnqueue::Aborted);
    }

    #[test]
    fn test_clear_resets_ring() {
        let q = PictureQueue::new(2);
        q.push(image(1), 0.0, false);
        q.clear();
        assert!(q.is_empty());
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_subtitle_expires_after_end() {
        let q = SubtitleQueue::new(4);
        q.push(SubtitleFrame {
            start: 1.0,
            end: 2.0,
            text: "一".to_string(),
        }, false);
        q.push(SubtitleFrame {
            start: 3.0,
            end: 4.0,
            text: "二".to_string(),
        }, false);
        assert!(q.current_at(0.5).is_none());
        assert_eq!(q.current_at(1.5).unwrap().text, "一");
        assert!(q.current_at(2.5).is_none());
        assert_eq!(q.len(), 1);
        assert_eq!(q.current_at(3.0).unwrap().text, "二");
    }

    #[test]
    fn test_subtitle_abort_releases_full_queue() {
        let q = Arc::new(SubtitleQueue::new(1));
        let frame = SubtitleFrame {
            start: 0.0,
            end: 1.0,
            text: String::new(),
        };
        assert_eq!(q.push(frame.clone(), true), PictureEnqueue::Queued);
        assert_eq!(q.push(frame.clone(), false), PictureEnqueue::Skipped);
        let q2 = q.clone();
        let producer = thread::spawn(move || q2.push(frame, true));
        thread::sleep(Duration::from_millis(20));
        q.abort();
        assert_eq!(producer.join().unwrap(), PictureEnqueue::Aborted);
    }

    #[test]
    fn test_flush_wakes_blocked_producer_and_discards_until_cleared() {
        let q = Arc::new(PictureQueue::new(1));
        q.push(image(1), 1.0, true);
        let q2 = q.clone();
        let producer = thread::spawn(move || q2.push(image(2), 1.04, true));
        thread::sleep(Duration::from_millis(20));
        q.begin_flush();
        assert_eq!(producer.join().unwrap(), PictureEnqueue::Discarded);
        assert!(q.is_empty());

        // flush 标记之前解出的旧画面不进入缓冲
        assert_eq!(q.push(image(3), 1.08, true), PictureEnqueue::Discarded);
        assert!(q.pop().is_none());

        q.clear();
        assert_eq!(q.push(image(4), 0.0, true), PictureEnqueue::Queued);
        assert_eq!(q.pop().unwrap().pts, 0.0);
    }

    #[test]
    fn test_cancel_flush_resumes_pictures() {
        let q = PictureQueue::new(2);
        q.begin_flush();
        assert!(q.is_discarding());
        q.cancel_flush();
        assert_eq!(q.push(image(1), 2.0, false), PictureEnqueue::Queued);
    }

    #[test]
    fn test_subtitle_flush_releases_full_queue_of_future_cues() {
        let q = Arc::new(SubtitleQueue::new(1));
        let cue = |start: f64, text: &str| SubtitleFrame {
            start,
            end: start + 0.09,
            text: text.to_string(),
        };
        q.push(cue(0.6, "未来"), true);
        let (q2, next) = (q.clone(), cue(0.7, "更远"));
        let producer = thread::spawn(move || q2.push(next, true));
        thread::sleep(Duration::from_millis(20));

        q.begin_flush();
        assert_eq!(producer.join().unwrap(), PictureEnqueue::Discarded);
        assert!(q.current_at(0.65).is_none());

        q.clear();
        q.push(cue(0.0, "开头"), true);
        assert_eq!(q.current_at(0.05).unwrap().text, "开头");
    }
}
