// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 显示通道 (UI sink)
//!
//! 显示层实现 [`UiSink`] 并在创建流水线时注册一次。采集线程和检测线程
//! 都会调用它, 所以实现必须线程安全且不能阻塞调用方。
//!
//! - [`ChannelSink`]: 三条有界通道 (原始帧/检测结果/日志), 满时丢弃最新
//! - [`RecordingSink`]: 装饰器, 按交付顺序缓存标注帧, 供导出使用
//! - [`NullSink`]: 丢弃一切

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender};
use image::RgbaImage;

use crate::frame::{DetectionResult, Frame};

/// 日志事件 (只追加, 核心不读取)
#[derive(Clone, Debug)]
pub struct LogEvent {
    pub at: DateTime<Local>,
    pub text: String,
}

impl LogEvent {
    pub fn now<S: Into<String>>(text: S) -> Self {
        Self {
            at: Local::now(),
            text: text.into(),
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.text)
    }
}

/// 显示层接口
pub trait UiSink: Send + Sync {
    /// 原始帧 (按采集顺序)
    fn deliver_raw(&self, frame: Frame);
    /// 检测结果 (按推理完成顺序)
    fn deliver_annotated(&self, result: DetectionResult);
    /// 日志
    fn log(&self, event: LogEvent);
}

impl<T: UiSink + ?Sized> UiSink for Arc<T> {
    fn deliver_raw(&self, frame: Frame) {
        (**self).deliver_raw(frame)
    }

    fn deliver_annotated(&self, result: DetectionResult) {
        (**self).deliver_annotated(result)
    }

    fn log(&self, event: LogEvent) {
        (**self).log(event)
    }
}

/// 丢弃所有输出
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl UiSink for NullSink {
    fn deliver_raw(&self, _frame: Frame) {}
    fn deliver_annotated(&self, _result: DetectionResult) {}
    fn log(&self, _event: LogEvent) {}
}

/// 各通道丢弃计数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkDrops {
    pub raw: u64,
    pub annotated: u64,
    pub log: u64,
}

/// 基于有界通道的显示输出
pub struct ChannelSink {
    raw_tx: Sender<Frame>,
    annotated_tx: Sender<DetectionResult>,
    log_tx: Sender<LogEvent>,
    raw_dropped: AtomicU64,
    annotated_dropped: AtomicU64,
    log_dropped: AtomicU64,
}

/// 显示层持有的接收端, 在渲染循环中轮询
pub struct UiReceiver {
    pub raw: Receiver<Frame>,
    pub annotated: Receiver<DetectionResult>,
    pub logs: Receiver<LogEvent>,
}

/// 创建一对 (发送端, 接收端), 每个通道容量为 `capacity`
pub fn channel_sink(capacity: usize) -> (ChannelSink, UiReceiver) {
    let capacity = capacity.max(1);
    let (raw_tx, raw) = crossbeam_channel::bounded(capacity);
    let (annotated_tx, annotated) = crossbeam_channel::bounded(capacity);
    let (log_tx, logs) = crossbeam_channel::bounded(capacity);
    (
        ChannelSink {
            raw_tx,
            annotated_tx,
            log_tx,
            raw_dropped: AtomicU64::new(0),
            annotated_dropped: AtomicU64::new(0),
            log_dropped: AtomicU64::new(0),
        },
        UiReceiver {
            raw,
            annotated,
            logs,
        },
    )
}

impl ChannelSink {
    pub fn drops(&self) -> SinkDrops {
        SinkDrops {
            raw: self.raw_dropped.load(Ordering::Relaxed),
            annotated: self.annotated_dropped.load(Ordering::Relaxed),
            log: self.log_dropped.load(Ordering::Relaxed),
        }
    }
}

impl UiSink for ChannelSink {
    fn deliver_raw(&self, frame: Frame) {
        if self.raw_tx.try_send(frame).is_err() {
            self.raw_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn deliver_annotated(&self, result: DetectionResult) {
        if self.annotated_tx.try_send(result).is_err() {
            self.annotated_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn log(&self, event: LogEvent) {
        if self.log_tx.try_send(event).is_err() {
            self.log_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl UiReceiver {
    /// 取出当前所有日志 (非阻塞)
    pub fn drain_logs(&self) -> Vec<LogEvent> {
        self.logs.try_iter().collect()
    }

    /// 只保留最新一帧原始画面 (渲染循环每次只需要最新的)
    pub fn latest_raw(&self) -> Option<Frame> {
        self.raw.try_iter().last()
    }

    pub fn latest_annotated(&self) -> Option<DetectionResult> {
        self.annotated.try_iter().last()
    }

    pub fn recv_annotated_timeout(&self, timeout: Duration) -> Option<DetectionResult> {
        self.annotated.recv_timeout(timeout).ok()
    }
}

/// 缓存标注帧的装饰器 (导出用)
pub struct RecordingSink<S> {
    inner: S,
    frames: Mutex<VecDeque<Arc<RgbaImage>>>,
    limit: usize,
    keep: usize,
}

impl<S: UiSink> RecordingSink<S> {
    /// 缓存超过 `limit` 帧时只保留最近的 `keep` 帧
    pub fn new(inner: S, limit: usize, keep: usize) -> Self {
        let limit = limit.max(1);
        Self {
            inner,
            frames: Mutex::new(VecDeque::new()),
            limit,
            keep: keep.min(limit),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// 按交付顺序返回缓存的标注帧
    pub fn recorded(&self) -> Vec<Arc<RgbaImage>> {
        let frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        frames.iter().cloned().collect()
    }

    pub fn recorded_len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear(&self) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<S: UiSink> UiSink for RecordingSink<S> {
    fn deliver_raw(&self, frame: Frame) {
        self.inner.deliver_raw(frame);
    }

    fn deliver_annotated(&self, result: DetectionResult) {
        {
            let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
            frames.push_back(Arc::clone(&result.annotated));
            // 限制缓存大小,防止内存溢出
            if frames.len() > self.limit {
                let excess = frames.len() - self.keep;
                frames.drain(..excess);
            }
        }
        self.inner.deliver_annotated(result);
    }

    fn log(&self, event: LogEvent) {
        self.inner.log(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(seq: u64) -> DetectionResult {
        DetectionResult {
            seq,
            epoch: 1,
            annotated: Arc::new(RgbaImage::new(1, 1)),
            detections: Vec::new(),
            inference_ms: 0.0,
        }
    }

    #[test]
    fn test_log_event_format() {
        let event = LogEvent::now("hello");
        let rendered = event.to_string();
        assert!(rendered.starts_with('['));
        assert!(rendered.ends_with("] hello"));
        assert_eq!(rendered.len(), "[00:00:00] hello".len());
    }

    #[test]
    fn test_channel_sink_drops_newest_when_full() {
        let (sink, rx) = channel_sink(2);
        for seq in 0..5 {
            sink.deliver_annotated(result(seq));
        }
        assert_eq!(sink.drops().annotated, 3);
        let seqs: Vec<u64> = rx.annotated.try_iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn test_channel_sink_per_channel_order() {
        let (sink, rx) = channel_sink(8);
        for seq in 0..4 {
            sink.deliver_raw(Frame::new(seq, 1, RgbaImage::new(1, 1)));
            sink.log(LogEvent::now(format!("line {seq}")));
        }
        let raw: Vec<u64> = rx.raw.try_iter().map(|f| f.seq).collect();
        assert_eq!(raw, vec![0, 1, 2, 3]);
        let logs: Vec<String> = rx.drain_logs().into_iter().map(|e| e.text).collect();
        assert_eq!(logs, vec!["line 0", "line 1", "line 2", "line 3"]);
        assert_eq!(sink.drops(), SinkDrops::default());
    }

    #[test]
    fn test_recording_sink_trims_to_keep() {
        let sink = RecordingSink::new(NullSink, 4, 2);
        for seq in 0..5 {
            sink.deliver_annotated(result(seq));
        }
        // 第5帧超限 → 只保留最近2帧
        assert_eq!(sink.recorded_len(), 2);
        sink.deliver_annotated(result(5));
        assert_eq!(sink.recorded_len(), 3);
        sink.clear();
        assert_eq!(sink.recorded_len(), 0);
    }

    #[test]
    fn test_recording_sink_forwards() {
        let (inner, rx) = channel_sink(4);
        let sink = RecordingSink::new(inner, 10, 5);
        sink.deliver_annotated(result(7));
        assert_eq!(rx.latest_annotated().map(|r| r.seq), Some(7));
        assert_eq!(sink.recorded().len(), 1);
    }
}
