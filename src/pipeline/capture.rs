// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 采集线程 (Capture)
//!
//! 职责: 按节拍读帧 → 原始帧送显示 → 尝试入队检测;
//! 收到停止命令后等待缓冲期, 再关闭视频源、清空队列、回到 Idle。

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::debug;

use super::{Control, PipelineStats, Shared, StopCause};
use crate::error::ReadError;
use crate::input::FrameSource;

enum Tick {
    Continue,
    EndOfStream,
}

pub(crate) struct Capture {
    shared: Arc<Shared>,
    source: FrameSource,
    control: Receiver<Control>,
    epoch: u64,
    interval: Duration,
}

impl Capture {
    pub fn new(
        shared: Arc<Shared>,
        source: FrameSource,
        control: Receiver<Control>,
        epoch: u64,
        interval: Duration,
    ) -> Self {
        Self {
            shared,
            source,
            control,
            epoch,
            interval,
        }
    }

    pub fn run(mut self) {
        debug!("📹 采集线程启动 (epoch {})", self.epoch);
        let shutdown = self.tick_loop();
        if !shutdown {
            self.grace_period();
        }
        self.release();
    }

    /// 节拍循环; 返回 true 表示收到 Shutdown
    fn tick_loop(&mut self) -> bool {
        let mut last_tick = Instant::now();
        let mut next_tick = last_tick;

        loop {
            let timeout = next_tick.saturating_duration_since(Instant::now());
            match self.control.recv_timeout(timeout) {
                Ok(Control::Reschedule(interval)) => {
                    debug!("⏩ 采集间隔调整为 {:?}", interval);
                    self.interval = interval;
                    next_tick = last_tick + interval;
                    continue;
                }
                Ok(Control::Stop) => return false,
                Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) => {}
            }

            last_tick = Instant::now();
            // 落后时不补拍
            next_tick = (next_tick + self.interval).max(last_tick);

            if let Tick::EndOfStream = self.tick() {
                self.shared.request_stop(StopCause::EndOfStream);
                return false;
            }
        }
    }

    fn tick(&mut self) -> Tick {
        if !self.shared.is_running(self.epoch) || self.shared.paused.load(Ordering::Relaxed) {
            return Tick::Continue;
        }

        let stats = &self.shared.stats;
        match self.source.read_frame() {
            Ok(frame) => {
                PipelineStats::bump(&stats.captured);
                self.shared.sink.deliver_raw(frame.clone());
                let seq = frame.seq;
                if !self.shared.queue.push(frame) {
                    PipelineStats::bump(&stats.queue_dropped);
                    debug!("队列已满, 丢弃帧 #{}", seq);
                }
                Tick::Continue
            }
            Err(ReadError::EndOfStream) => Tick::EndOfStream,
            Err(e) => {
                PipelineStats::bump(&stats.read_errors);
                self.shared.log_warn(format!("⚠️ 读取帧失败: {}", e));
                Tick::Continue
            }
        }
    }

    /// 停止缓冲期: 不再读帧, 只响应 Shutdown
    fn grace_period(&mut self) {
        let deadline = Instant::now() + self.shared.config.grace_period();
        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            if timeout.is_zero() {
                return;
            }
            match self.control.recv_timeout(timeout) {
                Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout) => return,
            }
        }
    }

    fn release(&mut self) {
        self.source.close();
        let cleared = self.shared.queue.clear();
        PipelineStats::add(&self.shared.stats.cleared_on_release, cleared as u64);
        if cleared > 0 {
            debug!("清空队列: {} 帧", cleared);
        }
        self.shared.log("🛑 检测已停止, 资源已释放");
        self.shared.set_idle();
    }
}
