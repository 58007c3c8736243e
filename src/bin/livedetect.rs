// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 实时检测 (livedetect)
///
/// 视频文件/摄像头 → 检测 → 控制台显示
///
/// 系统架构:
/// 1. 采集线程: 按节拍读帧, 原始帧送显示, 同时尝试入检测队列
/// 2. 检测线程: 从队列取帧推理, 标注结果送显示
/// 3. 显示线程: 打印日志, 统计收到的帧
/// 4. 主线程:   控制启停/倍速, 结束后导出标注帧
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use livedetect::export::{Exporter, ImageSequenceExporter};
use livedetect::{
    channel_sink, gen_time_string, Annotator, ChannelSink, DefaultOpener, Detector, LoadError,
    ModelLoader, MotionDetector, PipelineConfig, PipelineController, PlaybackConfig,
    RecordingSink, SourceDescriptor, UiReceiver, UiSink,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 实时检测参数
#[derive(Parser, Debug)]
#[command(author, version, about = "livedetect - 视频实时检测", long_about = None)]
struct Args {
    /// 视频文件 / GIF / 图片目录
    #[arg(short, long, conflicts_with = "device")]
    file: Option<PathBuf>,

    /// 摄像头编号
    #[arg(short, long)]
    device: Option<u32>,

    /// 配置文件 (默认: <配置目录>/livedetect/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 播放倍速 (≥1)
    #[arg(short, long, default_value_t = 1.0)]
    speed: f64,

    /// 运行时长(秒), 到时自动停止; 摄像头未指定时一直运行
    #[arg(long)]
    duration: Option<f64>,

    /// 导出标注帧的目录
    #[arg(short, long)]
    export: Option<PathBuf>,

    /// YOLOv8 ONNX 模型
    #[cfg(feature = "onnx")]
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// 标签字体 (TTF/OTF)
    #[arg(long)]
    font: Option<PathBuf>,
}

fn config_path(args: &Args) -> PathBuf {
    if let Some(path) = &args.config {
        return path.clone();
    }
    dirs::config_dir()
        .map(|dir| dir.join("livedetect").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("livedetect.json"))
}

fn model_loader(args: &Args) -> Arc<dyn ModelLoader> {
    #[cfg(feature = "onnx")]
    {
        if let Some(path) = &args.model {
            return Arc::new(livedetect::detection::OnnxLoader { path: path.clone() });
        }
    }
    let _ = args;
    Arc::new(|| -> Result<Box<dyn Detector>, LoadError> {
        Ok(Box::new(MotionDetector::default()))
    })
}

/// 运行时长; 未指定或非正时不限制
fn run_limit(duration: Option<f64>) -> Result<Option<Duration>> {
    match duration {
        Some(secs) if secs > 0.0 => match Duration::try_from_secs_f64(secs) {
            Ok(limit) => Ok(Some(limit)),
            Err(e) => bail!("无效的运行时长 {}: {}", secs, e),
        },
        _ => Ok(None),
    }
}

/// 导出帧率取视频源的名义帧率, 不受播放倍速影响
fn export_fps(playback: &PlaybackConfig) -> f64 {
    1.0 / playback.base_interval.as_secs_f64()
}

/// 控制台显示: 打印日志并统计收到的帧, 直到 `done` 置位
fn spawn_presenter(rx: UiReceiver, done: Arc<AtomicBool>) -> thread::JoinHandle<(u64, u64)> {
    thread::spawn(move || {
        let mut raw = 0u64;
        let mut annotated = 0u64;
        loop {
            let finished = done.load(Ordering::SeqCst);
            if let Ok(event) = rx.logs.recv_timeout(Duration::from_millis(50)) {
                println!("{}", event);
            }
            for event in rx.drain_logs() {
                println!("{}", event);
            }
            raw += rx.raw.try_iter().count() as u64;
            for result in rx.annotated.try_iter() {
                annotated += 1;
                if !result.detections.is_empty() {
                    println!(
                        "🎯 帧 #{} 检测到 {} 个目标 ({:.1}ms)",
                        result.seq,
                        result.detections.len(),
                        result.inference_ms
                    );
                }
            }
            if finished {
                break;
            }
        }
        (raw, annotated)
    })
}

fn main() -> Result<()> {
    // 会话日志由显示线程打印, 终端默认只输出警告 (RUST_LOG 可覆盖)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let descriptor = match (&args.file, args.device) {
        (Some(path), _) => SourceDescriptor::File(path.clone()),
        (None, Some(index)) => SourceDescriptor::Device(index),
        (None, None) => bail!("需要 --file 或 --device"),
    };

    let config = PipelineConfig::load(config_path(&args));
    config.print_summary();

    let (channel, rx) = channel_sink(config.ui_buffer);
    let recorder = Arc::new(RecordingSink::new(
        channel,
        config.recorder_limit,
        config.recorder_keep,
    ));
    let sink: Arc<dyn UiSink> = recorder.clone();

    let mut controller = PipelineController::new(
        config,
        Arc::new(DefaultOpener),
        model_loader(&args),
        sink,
    )?;
    if let Some(font) = &args.font {
        controller = controller.with_annotator(Annotator::with_font_file(font)?);
    }

    let done = Arc::new(AtomicBool::new(false));
    let presenter = spawn_presenter(rx, Arc::clone(&done));

    println!("🚀 实时检测启动");
    println!("📹 输入源: {}", descriptor);
    let started = Instant::now();
    controller
        .start(descriptor)
        .with_context(|| "启动检测失败".to_string())?;

    if args.speed != 1.0 {
        match controller.set_speed(args.speed) {
            Ok(interval) => info!("⏩ 倍速 {}x, 采集间隔 {:?}", args.speed, interval),
            Err(e) => warn!("⚠️  设置倍速失败: {}", e),
        }
    }
    let fps = controller.playback().map_or(0.0, |p| export_fps(&p));

    if let Some(limit) = run_limit(args.duration)? {
        if !controller.wait_until_idle(limit) {
            controller.stop();
        }
    }
    // 文件播完自动停止; 摄像头没有时长限制时一直等待
    while !controller.wait_until_idle(Duration::from_secs(1)) {}
    let elapsed = started.elapsed();

    done.store(true, Ordering::SeqCst);
    let (raw, annotated) = presenter.join().unwrap_or((0, 0));

    println!();
    println!("📊 运行 {:.1}s, 显示原始帧 {} / 标注帧 {}", elapsed.as_secs_f64(), raw, annotated);
    println!("📊 {}", controller.stats());
    let drops = ChannelSink::drops(recorder.inner());
    if drops.raw + drops.annotated + drops.log > 0 {
        warn!(
            "⚠️  显示通道丢弃: 原始 {} / 标注 {} / 日志 {}",
            drops.raw, drops.annotated, drops.log
        );
    }

    if let Some(dir) = &args.export {
        let frames = recorder.recorded();
        if frames.is_empty() {
            warn!("⚠️  没有可导出的标注帧");
        } else {
            let target = dir.join(format!("run_{}", gen_time_string("-")));
            let manifest = ImageSequenceExporter::new(&target).export(&frames, fps)?;
            println!(
                "💾 已导出 {} 帧 ({}x{}, {:.1}fps) 到 {}",
                manifest.frames,
                manifest.width,
                manifest.height,
                manifest.fps,
                target.display()
            );
        }
    }

    Ok(())
}
