// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 流水线配置参数
pub mod detection; // 智能检测系统
pub mod error; // 错误类型
pub mod export; // 标注帧导出
pub mod frame; // 帧与检测结果
pub mod input; // 视频输入系统
pub mod pipeline; // 采集 → 检测 → 显示 流水线
pub mod queue; // 待检测帧队列
pub mod sink; // 显示通道

pub use crate::config::PipelineConfig;
pub use crate::detection::{
    Annotator, DetectionFilter, DetectionModel, Detector, ModelLoader, MotionDetector,
};
pub use crate::error::{
    ConfigError, ControlError, InferenceError, LoadError, OpenError, ReadError, StartError,
};
pub use crate::export::{ExportManifest, Exporter, ImageSequenceExporter};
pub use crate::frame::{Detection, DetectionResult, Frame, Region};
pub use crate::input::{DefaultOpener, FrameReader, FrameSource, SourceDescriptor, SourceOpener};
pub use crate::pipeline::{PipelineController, PipelineState, PlaybackConfig, StatsSnapshot};
pub use crate::queue::FrameQueue;
pub use crate::sink::{channel_sink, ChannelSink, LogEvent, RecordingSink, UiReceiver, UiSink};

/// 本地时间字符串, 各字段之间用 `delimiter` 分隔 (用于导出目录命名)
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}
