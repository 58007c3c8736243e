// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 流水线统计 (原子计数器)

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) sessions: AtomicU64,
    pub(crate) captured: AtomicU64,
    pub(crate) queue_dropped: AtomicU64,
    pub(crate) read_errors: AtomicU64,
    pub(crate) inferred: AtomicU64,
    pub(crate) inference_errors: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) stale_discarded: AtomicU64,
    pub(crate) cleared_on_release: AtomicU64,
    pub(crate) stop_requests: AtomicU64,
    pub(crate) auto_stops: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// `queue_accepted` 由队列自身计数
    pub fn snapshot(&self, queue_accepted: u64) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            sessions: get(&self.sessions),
            captured: get(&self.captured),
            queue_accepted,
            queue_dropped: get(&self.queue_dropped),
            read_errors: get(&self.read_errors),
            inferred: get(&self.inferred),
            inference_errors: get(&self.inference_errors),
            delivered: get(&self.delivered),
            stale_discarded: get(&self.stale_discarded),
            cleared_on_release: get(&self.cleared_on_release),
            stop_requests: get(&self.stop_requests),
            auto_stops: get(&self.auto_stops),
        }
    }
}

/// 统计快照 (累计值, 跨会话)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sessions: u64,           // 成功启动的会话数
    pub captured: u64,           // 采集到的帧
    pub queue_accepted: u64,     // 进入检测队列的帧
    pub queue_dropped: u64,      // 队列满被丢弃的帧 (= push 失败次数)
    pub read_errors: u64,        // 读帧失败 (重试耗尽)
    pub inferred: u64,           // 推理成功
    pub inference_errors: u64,   // 推理失败
    pub delivered: u64,          // 交付显示的检测结果
    pub stale_discarded: u64,    // 会话已过期而丢弃的帧/结果
    pub cleared_on_release: u64, // 停止时清空的队列帧
    pub stop_requests: u64,      // 有效的 stop (含自动停止)
    pub auto_stops: u64,         // 读完自动停止
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "📊 统计:")?;
        writeln!(f, "  会话: {}", self.sessions)?;
        writeln!(
            f,
            "  采集: {} | 入队: {} | 队列丢弃: {} | 读取失败: {}",
            self.captured, self.queue_accepted, self.queue_dropped, self.read_errors
        )?;
        writeln!(
            f,
            "  推理: {} | 推理失败: {} | 已显示: {} | 过期丢弃: {} | 停止时清空: {}",
            self.inferred,
            self.inference_errors,
            self.delivered,
            self.stale_discarded,
            self.cleared_on_release
        )?;
        write!(f, "  停止: {} (自动 {})", self.stop_requests, self.auto_stops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_counters() {
        let stats = PipelineStats::default();
        PipelineStats::bump(&stats.captured);
        PipelineStats::bump(&stats.captured);
        PipelineStats::add(&stats.cleared_on_release, 3);
        let snap = stats.snapshot(2);
        assert_eq!(snap.captured, 2);
        assert_eq!(snap.queue_accepted, 2);
        assert_eq!(snap.cleared_on_release, 3);
        assert!(snap.to_string().contains("采集: 2"));
    }
}
