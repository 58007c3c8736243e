// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 错误类型 (Error types)
//!
//! 会话级错误 (打开源/加载模型) 返回给调用方;
//! 逐帧错误 (读取/推理) 只记录日志, 流水线继续运行。

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::PipelineState;

/// 视频源无法打开
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("video file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported video file: {0}")]
    Unsupported(PathBuf),

    #[error("no capture backend available for device {0} (build with the `ffmpeg` feature)")]
    NoBackend(u32),

    #[error("capture device {index} could not be opened: {reason}")]
    Device { index: u32, reason: String },

    #[error("capture device {0} opened but produced no frame")]
    DeviceProbe(u32),

    #[error("failed to open {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

/// 单帧读取失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// 文件源已读完 (不是错误, 触发自动停止)
    #[error("end of stream")]
    EndOfStream,

    #[error("frame read failed after {attempts} attempts: {reason}")]
    Read { attempts: u32, reason: String },
}

/// 检测模型加载失败
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("model file not found: {0}")]
    NotFound(PathBuf),

    #[error("model load failed: {0}")]
    Backend(String),
}

/// 单帧推理失败
#[derive(Error, Debug, Clone)]
#[error("inference failed: {0}")]
pub struct InferenceError(pub String);

impl InferenceError {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        Self(msg.into())
    }
}

/// `start()` 失败原因
#[derive(Error, Debug)]
pub enum StartError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error("detection model unavailable: {0}")]
    ModelUnavailable(#[source] LoadError),

    #[error("pipeline is busy ({0:?}), start is only valid from Idle")]
    Busy(PipelineState),

    #[error("start cancelled by a concurrent stop")]
    Cancelled,
}

/// 运行期控制命令 (变速/暂停) 失败原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("pipeline is not running ({0:?})")]
    NotRunning(PipelineState),

    #[error("speed multiplier must be a finite value >= 1, got {0}")]
    InvalidSpeed(f64),

    #[error("device sources cannot be paused")]
    NotPausable,
}

/// 配置校验失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid config `{field}`: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new<S: Into<String>>(field: &'static str, reason: S) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
