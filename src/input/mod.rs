// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 视频输入系统 (Video Input System)
///
/// 采集线程独占的视频源, 每次 `read_frame` 产出一帧
/// - GifReader:           GIF 动图文件
/// - ImageSequenceReader: 图片目录 / 单张图片
/// - FfmpegReader:        任意视频文件 + 本地摄像头 (需启用 `ffmpeg` 功能)
/// - FrameSource:         重试、帧序号、读完判定
pub mod gif;
pub mod image_dir;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{OpenError, ReadError};
use crate::frame::Frame;

pub use gif::GifReader;
pub use image_dir::ImageSequenceReader;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegReader;

/// 输入源描述 (由文件选择/设备选择提供, 已校验)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    Device(u32),
    File(PathBuf),
}

impl SourceDescriptor {
    pub fn is_file(&self) -> bool {
        matches!(self, SourceDescriptor::File(_))
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Device(index) => write!(f, "摄像头 #{}", index),
            SourceDescriptor::File(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                write!(f, "{}", name)
            }
        }
    }
}

/// 流元数据
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamInfo {
    pub fps: Option<f64>,          // 元数据帧率 (可能缺失或为0)
    pub total_frames: Option<u64>, // 总帧数 (摄像头为 None)
    pub width: u32,
    pub height: u32,
}

impl StreamInfo {
    /// 时长 (帧率或总帧数缺失时为 None)
    pub fn duration(&self) -> Option<Duration> {
        match (self.fps, self.total_frames) {
            (Some(fps), Some(total)) if fps.is_finite() && fps > 0.0 => {
                Some(Duration::from_secs_f64(total as f64 / fps))
            }
            _ => None,
        }
    }
}

/// 底层读帧接口 (单次尝试, 重试由 [`FrameSource`] 负责)
pub trait FrameReader: Send {
    fn info(&self) -> StreamInfo;

    /// 读取下一帧
    fn read(&mut self) -> Result<RgbaImage, String>;

    /// 已消耗的流位置 (包括解码失败的帧); None 表示只能按成功读取计数
    fn position(&self) -> Option<u64> {
        None
    }

    fn close(&mut self) {}
}

/// 打开底层读帧器
pub trait SourceOpener: Send + Sync {
    fn open_file(&self, path: &Path) -> Result<Box<dyn FrameReader>, OpenError>;
    fn open_device(&self, index: u32) -> Result<Box<dyn FrameReader>, OpenError>;
}

/// 默认实现: GIF / 图片 / 图片目录, 启用 `ffmpeg` 后支持视频文件和摄像头
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultOpener;

impl SourceOpener for DefaultOpener {
    fn open_file(&self, path: &Path) -> Result<Box<dyn FrameReader>, OpenError> {
        if !path.exists() {
            return Err(OpenError::NotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            return Ok(Box::new(ImageSequenceReader::open_dir(path)?));
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "gif" => return Ok(Box::new(GifReader::open(path)?)),
            "png" | "jpg" | "jpeg" | "bmp" => {
                return Ok(Box::new(ImageSequenceReader::from_files(vec![
                    path.to_path_buf(),
                ])))
            }
            _ => {}
        }

        #[cfg(feature = "ffmpeg")]
        {
            FfmpegReader::open_file(path).map(|r| Box::new(r) as Box<dyn FrameReader>)
        }
        #[cfg(not(feature = "ffmpeg"))]
        {
            Err(OpenError::Unsupported(path.to_path_buf()))
        }
    }

    fn open_device(&self, index: u32) -> Result<Box<dyn FrameReader>, OpenError> {
        #[cfg(feature = "ffmpeg")]
        {
            FfmpegReader::open_device(index).map(|r| Box::new(r) as Box<dyn FrameReader>)
        }
        #[cfg(not(feature = "ffmpeg"))]
        {
            Err(OpenError::NoBackend(index))
        }
    }
}

/// 由帧率计算名义采集间隔; 帧率缺失或非正时使用 `fallback`
pub fn nominal_interval(fps: Option<f64>, fallback: Duration) -> Duration {
    match fps {
        Some(fps) if fps.is_finite() && fps > 0.0 => {
            let nanos = (1e9 / fps).round() as u64;
            Duration::from_nanos(nanos).max(Duration::from_millis(1))
        }
        _ => fallback,
    }
}

/// 已打开的视频源 (一个会话一个)
pub struct FrameSource {
    descriptor: SourceDescriptor,
    reader: Box<dyn FrameReader>,
    info: StreamInfo,
    interval: Duration,
    epoch: u64,
    next_seq: u64,
    consumed: u64,
    read_retries: u32,
    closed: bool,
}

impl FrameSource {
    /// 打开视频源; 摄像头依次尝试主设备和备用设备
    pub fn open(
        opener: &dyn SourceOpener,
        descriptor: &SourceDescriptor,
        config: &PipelineConfig,
        epoch: u64,
    ) -> Result<Self, OpenError> {
        let read_retries = config.read_retries.max(1);
        let (descriptor, reader) = match descriptor {
            SourceDescriptor::File(path) => (descriptor.clone(), opener.open_file(path)?),
            SourceDescriptor::Device(index) => {
                let (opened, reader) = open_device(opener, *index, config)?;
                (SourceDescriptor::Device(opened), reader)
            }
        };

        let info = reader.info();
        let interval = match descriptor {
            SourceDescriptor::File(_) => nominal_interval(info.fps, config.fallback_file_interval()),
            SourceDescriptor::Device(_) => config.device_interval(),
        };

        Ok(Self {
            descriptor,
            reader,
            info,
            interval,
            epoch,
            next_seq: 0,
            consumed: 0,
            read_retries,
            closed: false,
        })
    }

    /// 读取一帧; 失败时重试, 重试耗尽后文件源按已读/总帧数区分读完与读错
    pub fn read_frame(&mut self) -> Result<Frame, ReadError> {
        if self.closed {
            return Err(ReadError::Read {
                attempts: 0,
                reason: "source closed".to_string(),
            });
        }

        let mut last_reason = String::new();
        for attempt in 1..=self.read_retries {
            match self.reader.read() {
                Ok(image) => {
                    let frame = Frame::new(self.next_seq, self.epoch, image);
                    self.next_seq += 1;
                    self.consumed += 1;
                    return Ok(frame);
                }
                Err(reason) => {
                    debug!("读帧失败 ({}/{}): {}", attempt, self.read_retries, reason);
                    last_reason = reason;
                }
            }
        }

        if self.descriptor.is_file() && self.is_exhausted() {
            return Err(ReadError::EndOfStream);
        }
        Err(ReadError::Read {
            attempts: self.read_retries,
            reason: last_reason,
        })
    }

    /// 文件是否已读完; 总帧数未知时视为读完
    fn is_exhausted(&self) -> bool {
        let position = self.reader.position().unwrap_or(self.consumed);
        match self.info.total_frames {
            Some(total) => position >= total,
            None => true,
        }
    }

    /// 释放底层资源 (可重复调用)
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.reader.close();
            debug!("视频源已关闭: {}", self.descriptor);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// 名义采集间隔 (未考虑播放倍速)
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 已成功读取的帧数
    pub fn frames_read(&self) -> u64 {
        self.consumed
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_device(
    opener: &dyn SourceOpener,
    index: u32,
    config: &PipelineConfig,
) -> Result<(u32, Box<dyn FrameReader>), OpenError> {
    let mut candidates = vec![index];
    if let Some(fallback) = config.device_fallback_index {
        if fallback != index {
            candidates.push(fallback);
        }
    }

    let mut last_err = OpenError::NoBackend(index);
    for candidate in candidates {
        match opener.open_device(candidate) {
            Ok(mut reader) => {
                if config.probe_device_on_open && !probe(reader.as_mut(), config.read_retries) {
                    warn!("⚠️ 摄像头 #{} 无法读取帧", candidate);
                    reader.close();
                    last_err = OpenError::DeviceProbe(candidate);
                    continue;
                }
                if candidate != index {
                    info!("📷 主摄像头 #{} 不可用, 使用备用摄像头 #{}", index, candidate);
                }
                return Ok((candidate, reader));
            }
            Err(e) => {
                warn!("⚠️ 摄像头 #{} 打开失败: {}", candidate, e);
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// 验证摄像头帧读取能力
fn probe(reader: &mut dyn FrameReader, attempts: u32) -> bool {
    (0..attempts.max(1)).any(|_| reader.read().is_ok())
}


#[cfg(test)]
mod tests {
    use super::testing::{SyntheticOpener, SyntheticReader};
    use super::*;
    use std::sync::Arc;

    fn file(path: &str) -> SourceDescriptor {
        SourceDescriptor::File(PathBuf::from(path))
    }

    #[test]
    fn test_nominal_interval_from_fps() {
        let fallback = Duration::from_millis(40);
        assert_eq!(nominal_interval(Some(25.0), fallback), Duration::from_millis(40));
        assert_eq!(nominal_interval(Some(50.0), fallback), Duration::from_millis(20));
    }

    #[test]
    fn test_zero_fps_falls_back_to_default() {
        let fallback = Duration::from_millis(40);
        assert_eq!(nominal_interval(Some(0.0), fallback), fallback);
        assert_eq!(nominal_interval(Some(-3.0), fallback), fallback);
        assert_eq!(nominal_interval(Some(f64::NAN), fallback), fallback);
        assert_eq!(nominal_interval(None, fallback), fallback);
    }

    #[test]
    fn test_file_with_zero_fps_uses_fallback_interval() {
        let opener = SyntheticOpener::default().with_file("a.mp4", SyntheticReader::file(3, Some(0.0)));
        let config = PipelineConfig::default();
        let source = FrameSource::open(&opener, &file("a.mp4"), &config, 1).unwrap();
        assert_eq!(source.interval(), config.fallback_file_interval());
        assert!(source.interval() > Duration::ZERO);
    }

    #[test]
    fn test_sequence_numbers_increase_and_end_of_stream() {
        let opener = SyntheticOpener::default().with_file("a.gif", SyntheticReader::file(3, Some(10.0)));
        let config = PipelineConfig::default();
        let mut source = FrameSource::open(&opener, &file("a.gif"), &config, 7).unwrap();
        assert_eq!(source.interval(), Duration::from_millis(100));

        let seqs: Vec<u64> = (0..3).map(|_| source.read_frame().unwrap().seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(source.read_frame().unwrap_err(), ReadError::EndOfStream);
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let mut reader = SyntheticReader::file(2, Some(10.0));
        reader.fail_pattern = vec![true, true, false];
        let opener = SyntheticOpener::default().with_file("a.gif", reader);
        let config = PipelineConfig::default();
        let mut source = FrameSource::open(&opener, &file("a.gif"), &config, 1).unwrap();

        let frame = source.read_frame().unwrap();
        assert_eq!(frame.seq, 0);
        assert_eq!(frame.epoch, 1);
    }

    #[test]
    fn test_read_error_before_end_of_file() {
        let mut reader = SyntheticReader::file(5, Some(10.0));
        reader.fail_pattern = vec![true; 3];
        let opener = SyntheticOpener::default().with_file("a.gif", reader);
        let config = PipelineConfig::default();
        let mut source = FrameSource::open(&opener, &file("a.gif"), &config, 1).unwrap();

        match source.read_frame() {
            Err(ReadError::Read { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected read error, got {:?}", other.map(|f| f.seq)),
        }
        // 之后恢复正常
        assert_eq!(source.read_frame().unwrap().seq, 0);
    }

    #[test]
    fn test_device_never_reports_end_of_stream() {
        let mut reader = SyntheticReader::device();
        reader.remaining = Some(1);
        let opener = SyntheticOpener::default().with_device(0, reader);
        let config = PipelineConfig {
            probe_device_on_open: false,
            ..Default::default()
        };
        let mut source =
            FrameSource::open(&opener, &SourceDescriptor::Device(0), &config, 1).unwrap();
        assert_eq!(source.interval(), config.device_interval());
        assert!(source.read_frame().is_ok());
        assert!(matches!(source.read_frame(), Err(ReadError::Read { .. })));
    }

    #[test]
    fn test_device_falls_back_to_secondary_index() {
        let opener = SyntheticOpener::default().with_device(1, SyntheticReader::device());
        let config = PipelineConfig::default();
        let source = FrameSource::open(&opener, &SourceDescriptor::Device(0), &config, 1).unwrap();
        assert_eq!(source.descriptor(), &SourceDescriptor::Device(1));
        assert_eq!(*opener.device_attempts.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_device_open_fails_after_fallback() {
        let opener = SyntheticOpener::default();
        let config = PipelineConfig::default();
        let err = FrameSource::open(&opener, &SourceDescriptor::Device(0), &config, 1)
            .err()
            .unwrap();
        assert!(matches!(err, OpenError::Device { index: 1, .. }));
    }

    #[test]
    fn test_device_probe_failure() {
        let mut reader = SyntheticReader::device();
        reader.remaining = Some(0);
        let opener = SyntheticOpener::default().with_device(0, reader);
        let config = PipelineConfig {
            device_fallback_index: None,
            ..Default::default()
        };
        let err = FrameSource::open(&opener, &SourceDescriptor::Device(0), &config, 1)
            .err()
            .unwrap();
        assert!(matches!(err, OpenError::DeviceProbe(0)));
    }

    #[test]
    fn test_close_is_idempotent_and_releases_reader() {
        let reader = SyntheticReader::file(3, Some(10.0));
        let closed = Arc::clone(&reader.closed);
        let opener = SyntheticOpener::default().with_file("a.gif", reader);
        let config = PipelineConfig::default();
        let mut source = FrameSource::open(&opener, &file("a.gif"), &config, 1).unwrap();
        source.close();
        source.close();
        assert!(source.is_closed());
        assert!(*closed.lock().unwrap());
        assert!(source.read_frame().is_err());
    }

    #[test]
    fn test_default_opener_missing_file() {
        let err = DefaultOpener
            .open_file(Path::new("/definitely/not/here.gif"))
            .err()
            .unwrap();
        assert!(matches!(err, OpenError::NotFound(_)));
    }

    #[test]
    fn test_stream_duration() {
        let info = StreamInfo {
            fps: Some(25.0),
            total_frames: Some(50),
            width: 1,
            height: 1,
        };
        assert_eq!(info.duration(), Some(Duration::from_secs(2)));
        assert_eq!(StreamInfo::default().duration(), None);
    }
}
