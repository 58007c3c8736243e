// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 视频处理流水线 (Video Processing Pipeline)
///
/// 线程架构, 通过有界队列和会话代数协作:
/// - Capture:  采集节拍 (每个会话一个线程, 独占视频源)
/// - Worker:   目标检测 (控制器生命周期内常驻)
/// - UiSink:   显示层 (外部实现, 不阻塞调用方)
pub mod capture;
pub mod controller;
pub mod stats;
pub mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::detection::DetectionModel;
use crate::input::SourceDescriptor;
use crate::queue::FrameQueue;
use crate::sink::{LogEvent, UiSink};

pub use controller::PipelineController;
pub use stats::{PipelineStats, StatsSnapshot};

/// 流水线状态: Idle → Starting → Running → Stopping → Idle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// 播放参数 (仅在 Running 时可修改)
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackConfig {
    pub descriptor: SourceDescriptor,
    pub base_interval: Duration, // 名义采集间隔
    pub speed: f64,              // 播放倍速 (>= 1)
}

impl PlaybackConfig {
    pub fn new(descriptor: SourceDescriptor, base_interval: Duration) -> Self {
        Self {
            descriptor,
            base_interval,
            speed: 1.0,
        }
    }

    /// 实际节拍间隔 = 名义间隔 / 倍速 (纳秒取整, 至少 1ms)
    pub fn tick_interval(&self) -> Duration {
        let nanos = (self.base_interval.as_nanos() as f64 / self.speed).round() as u64;
        Duration::from_nanos(nanos).max(Duration::from_millis(1))
    }
}

/// 采集线程控制命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Control {
    Stop,
    Reschedule(Duration),
    Shutdown,
}

/// 停止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopCause {
    Requested,
    EndOfStream,
}

/// 当前会话 (与状态一起加锁, 保证状态转换和控制通道一致)
pub(crate) struct Session {
    pub state: PipelineState,
    pub playback: Option<PlaybackConfig>,
    pub control: Option<Sender<Control>>,
    pub capture: Option<JoinHandle<()>>,
}

/// 控制器、采集线程、检测线程共享的状态
pub(crate) struct Shared {
    pub config: PipelineConfig,
    pub session: Mutex<Session>,
    pub idle: Condvar,
    pub epoch: AtomicU64,
    pub queue: FrameQueue,
    pub sink: std::sync::Arc<dyn UiSink>,
    pub model: Mutex<Option<DetectionModel>>,
    pub stats: PipelineStats,
    pub paused: AtomicBool,
    pub shutdown: AtomicBool,
}

impl Shared {
    pub fn new(config: PipelineConfig, sink: std::sync::Arc<dyn UiSink>) -> Self {
        let queue = FrameQueue::new(config.queue_capacity);
        Self {
            config,
            session: Mutex::new(Session {
                state: PipelineState::Idle,
                playback: None,
                control: None,
                capture: None,
            }),
            idle: Condvar::new(),
            epoch: AtomicU64::new(0),
            queue,
            sink,
            model: Mutex::new(None),
            stats: PipelineStats::default(),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lock_model(&self) -> MutexGuard<'_, Option<DetectionModel>> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// 会话代数 +1, 返回新值
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }

    /// 采集节拍是否有效: 状态 Running 且会话未过期
    pub fn is_running(&self, epoch: u64) -> bool {
        self.lock_session().state == PipelineState::Running && self.is_current(epoch)
    }

    /// Starting/Running → Stopping; 其他状态为空操作. 返回是否发生了转换
    pub fn request_stop(&self, cause: StopCause) -> bool {
        let mut session = self.lock_session();
        match session.state {
            PipelineState::Starting | PipelineState::Running => {
                session.state = PipelineState::Stopping;
                self.advance_epoch();
                if let Some(control) = &session.control {
                    let _ = control.send(Control::Stop);
                }
                drop(session);

                PipelineStats::bump(&self.stats.stop_requests);
                match cause {
                    StopCause::Requested => self.log("⏹️ 正在停止检测..."),
                    StopCause::EndOfStream => {
                        PipelineStats::bump(&self.stats.auto_stops);
                        self.log("✅ 视频播放完毕");
                    }
                }
                true
            }
            PipelineState::Idle | PipelineState::Stopping => false,
        }
    }

    /// 回到 Idle 并唤醒等待者
    pub fn set_idle(&self) {
        let mut session = self.lock_session();
        session.state = PipelineState::Idle;
        session.playback = None;
        session.control = None;
        drop(session);
        self.idle.notify_all();
    }

    /// 用户可见日志: tracing + UiSink
    pub fn log<S: Into<String>>(&self, text: S) {
        let text = text.into();
        info!("{}", text);
        self.sink.log(LogEvent::now(text));
    }

    pub fn log_warn<S: Into<String>>(&self, text: S) {
        let text = text.into();
        warn!("{}", text);
        self.sink.log(LogEvent::now(text));
    }
}
