// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 待检测帧队列 (Frame hand-off queue)
//!
//! 采集线程 → 检测线程的有界队列。队列满时丢弃*最新*到达的帧,
//! 已入队的帧保持原有顺序, 采集线程永不阻塞。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::frame::Frame;

pub struct FrameQueue {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    capacity: usize,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// 容量至少为 1 (0 容量的 channel 是同步交接, 不适合做缓冲)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// 入队; 返回 false 表示队列已满, 该帧被丢弃
    pub fn push(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// 出队, 最多等待 `timeout`
    pub fn pop(&self, timeout: Duration) -> Option<Frame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// 清空队列, 返回丢弃的帧数
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 累计入队成功的帧数
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// 累计因队列满被丢弃的帧数
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use rand::Rng;
    use std::sync::Arc;
    use std::thread;

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, 1, RgbaImage::new(2, 2))
    }

    #[test]
    fn test_push_beyond_capacity_drops_newest() {
        let queue = FrameQueue::new(2);
        assert!(queue.push(frame(0)));
        assert!(queue.push(frame(1)));
        assert!(!queue.push(frame(2)));
        assert!(!queue.push(frame(3)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped_count(), 2);

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.pop(timeout).map(|f| f.seq), Some(0));
        assert_eq!(queue.pop(timeout).map(|f| f.seq), Some(1));
        assert!(queue.pop(timeout).is_none());
    }

    #[test]
    fn test_never_exceeds_capacity_for_random_capacities() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let capacity = rng.gen_range(1..=8);
            let queue = FrameQueue::new(capacity);
            let pushes = rng.gen_range(0..32u64);
            let mut accepted = Vec::new();
            for seq in 0..pushes {
                if queue.push(frame(seq)) {
                    accepted.push(seq);
                }
                assert!(queue.len() <= capacity);
            }
            assert_eq!(queue.accepted_count() + queue.dropped_count(), pushes);
            let drained: Vec<u64> = std::iter::from_fn(|| queue.pop(Duration::ZERO))
                .map(|f| f.seq)
                .collect();
            assert_eq!(drained, accepted);
        }
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = FrameQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.push(frame(0)));
        assert!(!queue.push(frame(1)));
    }

    #[test]
    fn test_clear_returns_discarded_count() {
        let queue = FrameQueue::new(3);
        for seq in 0..3 {
            queue.push(frame(seq));
        }
        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue = FrameQueue::new(1);
        let start = std::time::Instant::now();
        assert!(queue.pop(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_consumer_sees_increasing_sequence() {
        let queue = Arc::new(FrameQueue::new(2));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(frame) = queue.pop(Duration::from_millis(100)) {
                    seen.push(frame.seq);
                    thread::sleep(Duration::from_millis(1));
                }
                seen
            })
        };
        for seq in 0..200 {
            queue.push(frame(seq));
        }
        let seen = consumer.join().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}
