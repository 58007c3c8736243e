// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 流水线控制器 (PipelineController)
//!
//! 外部 (UI / CLI) 唯一直接调用的组件: 启动/停止会话、变速、暂停。
//! 每个会话递增一次代数 (epoch), stop 时再递增一次, 采集节拍和检测结果
//! 都带着代数, 过期的直接丢弃。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use super::capture::Capture;
use super::{
    worker, Control, PipelineState, PipelineStats, PlaybackConfig, Shared, StatsSnapshot,
    StopCause,
};
use crate::config::PipelineConfig;
use crate::detection::{Annotator, DetectionModel, ModelLoader};
use crate::error::{ConfigError, ControlError, LoadError, StartError};
use crate::input::{FrameSource, SourceDescriptor, SourceOpener};
use crate::sink::UiSink;

pub struct PipelineController {
    shared: Arc<Shared>,
    opener: Arc<dyn SourceOpener>,
    loader: Arc<dyn ModelLoader>,
    annotator: Arc<Annotator>,
    model_stale: AtomicBool,
    worker: Option<JoinHandle<()>>,
}

impl PipelineController {
    /// 创建控制器并启动常驻检测线程
    pub fn new(
        config: PipelineConfig,
        opener: Arc<dyn SourceOpener>,
        loader: Arc<dyn ModelLoader>,
        sink: Arc<dyn UiSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let shared = Arc::new(Shared::new(config, sink));
        let worker = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || worker::run(shared))
        };

        Ok(Self {
            shared,
            opener,
            loader,
            annotator: Arc::new(Annotator::default()),
            model_stale: AtomicBool::new(false),
            worker: Some(worker),
        })
    }

    /// 替换标注器 (下次加载模型时生效)
    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Arc::new(annotator);
        self.model_stale.store(true, Ordering::SeqCst);
        self
    }

    /// 启动会话 (仅 Idle 有效)
    ///
    /// 先加载模型再打开视频源; 任一失败都回到 Idle, 不会产生采集节拍。
    pub fn start(&self, descriptor: SourceDescriptor) -> Result<(), StartError> {
        let previous = {
            let mut session = self.shared.lock_session();
            if session.state != PipelineState::Idle {
                return Err(StartError::Busy(session.state));
            }
            session.state = PipelineState::Starting;
            session.capture.take()
        };
        // 上一个会话的采集线程已释放资源, 只差退出
        if let Some(handle) = previous {
            let _ = handle.join();
        }

        let epoch = self.shared.advance_epoch();
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.log(format!("▶️ 启动检测: {}", descriptor));

        if let Err(e) = self.ensure_model() {
            self.shared.log_warn(format!("❌ 模型加载失败: {}", e));
            self.shared.set_idle();
            return Err(StartError::ModelUnavailable(e));
        }

        let mut source = match FrameSource::open(
            self.opener.as_ref(),
            &descriptor,
            &self.shared.config,
            epoch,
        ) {
            Ok(source) => source,
            Err(e) => {
                self.shared.log_warn(format!("❌ 无法打开视频源: {}", e));
                self.shared.set_idle();
                return Err(StartError::Open(e));
            }
        };
        self.log_source_info(&source);

        let playback = PlaybackConfig::new(source.descriptor().clone(), source.interval());
        let mut session = self.shared.lock_session();
        // 启动期间收到了 stop
        if session.state != PipelineState::Starting || !self.shared.is_current(epoch) {
            drop(session);
            source.close();
            self.shared.set_idle();
            self.shared.log("⏹️ 启动已取消");
            return Err(StartError::Cancelled);
        }

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let capture = Capture::new(
            Arc::clone(&self.shared),
            source,
            control_rx,
            epoch,
            playback.tick_interval(),
        );
        session.state = PipelineState::Running;
        session.playback = Some(playback);
        session.control = Some(control_tx);
        session.capture = Some(thread::spawn(move || capture.run()));
        drop(session);

        PipelineStats::bump(&self.shared.stats.sessions);
        self.shared.log("✅ 检测已启动");
        Ok(())
    }

    /// 停止会话 (Starting/Running 有效, 其他状态为空操作)
    ///
    /// 立即停止采集, 缓冲期结束后由采集线程关闭视频源、清空队列并回到 Idle。
    /// 返回是否真正发起了停止。
    pub fn stop(&self) -> bool {
        self.shared.request_stop(StopCause::Requested)
    }

    /// 调整播放倍速 (仅 Running 有效), 返回新的节拍间隔
    pub fn set_speed(&self, multiplier: f64) -> Result<Duration, ControlError> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ControlError::InvalidSpeed(multiplier));
        }

        let mut session = self.shared.lock_session();
        let state = session.state;
        if state != PipelineState::Running {
            return Err(ControlError::NotRunning(state));
        }
        let interval = match session.playback.as_mut() {
            Some(playback) => {
                playback.speed = multiplier;
                playback.tick_interval()
            }
            None => return Err(ControlError::NotRunning(state)),
        };
        if let Some(control) = &session.control {
            let _ = control.send(Control::Reschedule(interval));
        }
        drop(session);

        self.shared.log(format!("⏩ 播放速度: {}x", multiplier));
        Ok(interval)
    }

    /// 暂停文件播放 (摄像头不支持)
    pub fn pause(&self) -> Result<(), ControlError> {
        self.check_pausable()?;
        if !self.shared.paused.swap(true, Ordering::SeqCst) {
            self.shared.log("⏸️ 已暂停");
        }
        Ok(())
    }

    pub fn resume(&self) -> Result<(), ControlError> {
        self.check_pausable()?;
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            self.shared.log("▶️ 继续播放");
        }
        Ok(())
    }

    fn check_pausable(&self) -> Result<(), ControlError> {
        let session = self.shared.lock_session();
        if session.state != PipelineState::Running {
            return Err(ControlError::NotRunning(session.state));
        }
        match &session.playback {
            Some(playback) if playback.descriptor.is_file() => Ok(()),
            _ => Err(ControlError::NotPausable),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// 丢弃已加载的模型, 下次 start() 重新加载
    pub fn reload_model(&self) {
        self.model_stale.store(true, Ordering::SeqCst);
        self.shared.log("🔄 模型将在下次启动时重新加载");
    }

    pub fn state(&self) -> PipelineState {
        self.shared.lock_session().state
    }

    /// 当前会话代数
    pub fn epoch(&self) -> u64 {
        self.shared.current_epoch()
    }

    pub fn playback(&self) -> Option<PlaybackConfig> {
        self.shared.lock_session().playback.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared
            .stats
            .snapshot(self.shared.queue.accepted_count())
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// 等待回到 Idle; 超时返回 false
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let session = self.shared.lock_session();
        let (session, _) = self
            .shared
            .idle
            .wait_timeout_while(session, timeout, |s| s.state != PipelineState::Idle)
            .unwrap_or_else(PoisonError::into_inner);
        session.state == PipelineState::Idle
    }

    fn ensure_model(&self) -> Result<(), LoadError> {
        let mut slot = self.shared.lock_model();
        if self.model_stale.swap(false, Ordering::SeqCst) {
            *slot = None;
        }
        if slot.is_none() {
            let detector = self.loader.load()?;
            self.shared.log(format!("✅ 模型加载完成: {}", detector.name()));
            *slot = Some(DetectionModel::new(
                detector,
                self.shared.config.detection.clone(),
                Arc::clone(&self.annotator),
            ));
        }
        Ok(())
    }

    fn log_source_info(&self, source: &FrameSource) {
        let info = source.info();
        match source.descriptor() {
            SourceDescriptor::File(_) => {
                let fps = info
                    .fps
                    .filter(|f| f.is_finite() && *f > 0.0)
                    .map_or_else(|| "帧率未知".to_string(), |f| format!("{:.1}fps", f));
                let frames = info
                    .total_frames
                    .map_or_else(|| "帧数未知".to_string(), |n| format!("{} 帧", n));
                let duration = info
                    .duration()
                    .map_or_else(|| "时长未知".to_string(), |d| format!("时长 {:.1}秒", d.as_secs_f64()));
                self.shared.log(format!(
                    "📹 视频信息: {} | {} | {} | {}x{} | 采集间隔 {:?}",
                    fps,
                    frames,
                    duration,
                    info.width,
                    info.height,
                    source.interval()
                ));
            }
            SourceDescriptor::Device(index) => {
                self.shared.log(format!(
                    "📷 摄像头 #{} 已打开, 采集间隔 {:?}",
                    index,
                    source.interval()
                ));
            }
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let capture = {
            let mut session = self.shared.lock_session();
            if let Some(control) = &session.control {
                let _ = control.send(Control::Shutdown);
            }
            session.capture.take()
        };
        if let Some(handle) = capture {
            let _ = handle.join();
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        debug!("流水线已关闭");
    }
}
