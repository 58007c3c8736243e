// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! FFmpeg 输入 - 视频文件与本地摄像头
//!
//! 解码在独立线程中运行 (`FfmpegContext::start().wait()` 会阻塞),
//! 解码滤镜把 YUV420P 帧转换为 RGBA 后送入有界通道, `read()` 从通道取帧。
//! 文件源在通道满时阻塞解码 (不丢帧), 摄像头源丢弃新帧 (只保留最新画面)。
//! 摄像头支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Frame, Input};
use image::RgbaImage;
use tracing::{debug, info, warn};

use super::{FrameReader, StreamInfo};
use crate::error::OpenError;

const FRAME_BUFFER: usize = 4;
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// 解码滤镜: YUV420P → RGBA → 通道
struct DecodeFilter {
    tx: Sender<RgbaImage>,
    closed: Arc<AtomicBool>,
    block_when_full: bool,
    decoded: u64,
    dropped: u64,
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        // 视频源已关闭则终止解码
        if self.closed.load(Ordering::Relaxed) {
            return Err("source closed".to_string());
        }

        let image = match unsafe { frame_to_rgba(&frame) } {
            Some(image) => image,
            None => {
                self.dropped += 1;
                return Ok(None);
            }
        };
        self.decoded += 1;

        let delivered = if self.block_when_full {
            self.tx.send(image).map_err(|_| ())
        } else {
            match self.tx.try_send(image) {
                Ok(()) => Ok(()),
                Err(crossbeam_channel::TrySendError::Full(_)) => {
                    self.dropped += 1;
                    Ok(())
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => Err(()),
            }
        };
        if delivered.is_err() {
            return Err("reader dropped".to_string());
        }
        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        debug!(
            "✅ 解码线程退出: 解码{}帧, 丢弃{}帧",
            self.decoded, self.dropped
        );
    }
}

/// 行跨度能否容纳一行像素; 奇数宽度的色度行有 (w + 1) / 2 个采样
fn strides_fit(w: usize, y_stride: usize, uv_stride: usize) -> bool {
    y_stride >= w && uv_stride >= w.div_ceil(2)
}

/// 校验帧并转换为 RGBA; 空帧/损坏帧/非法分辨率返回 None
unsafe fn frame_to_rgba(frame: &Frame) -> Option<RgbaImage> {
    if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
        return None;
    }

    let raw = &*frame.as_ptr();
    let w = raw.width as usize;
    let h = raw.height as usize;
    if w == 0 || h == 0 || w > 4096 || h > 4096 {
        return None;
    }
    // 只丢弃严重错误的帧 (缺少参考帧、无效比特流)
    if raw.decode_error_flags & 0x03 != 0 {
        return None;
    }

    let (y_plane, u_plane, v_plane) = (raw.data[0], raw.data[1], raw.data[2]);
    let y_stride = raw.linesize[0] as usize;
    let uv_stride = raw.linesize[1] as usize;
    if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
        return None;
    }
    if !strides_fit(w, y_stride, uv_stride) {
        return None;
    }

    let mut buffer = vec![255u8; w * h * 4];
    yuv420p_to_rgba(y_plane, u_plane, v_plane, y_stride, uv_stride, &mut buffer, w, h);
    RgbaImage::from_raw(w as u32, h as u32, buffer)
}

/// BT.601 整数近似
#[allow(clippy::too_many_arguments)]
#[inline]
unsafe fn yuv420p_to_rgba(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 4;
        }
    }
}

/// 格式化摄像头输入 - 根据平台选择 (Windows 需要设备名称)
fn camera_input(index: u32) -> Result<(String, &'static str), OpenError> {
    #[cfg(target_os = "windows")]
    {
        let devices = ez_ffmpeg::device::get_input_video_devices().map_err(|e| {
            OpenError::Device {
                index,
                reason: format!("device enumeration failed: {}", e),
            }
        })?;
        let name = devices
            .into_iter()
            .nth(index as usize)
            .ok_or_else(|| OpenError::Device {
                index,
                reason: "no such device".to_string(),
            })?;
        Ok((format!("video={}", name), "dshow"))
    }
    #[cfg(target_os = "macos")]
    {
        Ok((format!("{}", index), "avfoundation"))
    }
    #[cfg(target_os = "linux")]
    {
        Ok((format!("/dev/video{}", index), "v4l2"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        Ok((format!("{}", index), "video4linux2"))
    }
}

/// 可用的摄像头设备列表
pub fn list_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}

pub struct FfmpegReader {
    rx: Option<Receiver<RgbaImage>>,
    closed: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    received: AtomicU64,
    info: StreamInfo,
}

impl FfmpegReader {
    pub fn open_file(path: &Path) -> Result<Self, OpenError> {
        let url = path.to_string_lossy().into_owned();
        let info = probe_file(&url);
        let input = Input::new(url.as_str());
        Self::spawn(input, info, true).map_err(|reason| OpenError::File {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn open_device(index: u32) -> Result<Self, OpenError> {
        let (url, format) = camera_input(index)?;
        info!("📷 打开摄像头 #{}: {} ({})", index, url, format);
        let input = Input::new(url.as_str())
            .set_format(format)
            .set_input_opts([("framerate", "30"), ("video_size", "1280x720")].into());
        let info = StreamInfo {
            fps: Some(30.0),
            ..Default::default()
        };
        Self::spawn(input, info, false).map_err(|reason| OpenError::Device { index, reason })
    }

    /// 启动解码线程, 等待 FFmpeg 上下文构建完成
    fn spawn(input: Input, info: StreamInfo, block_when_full: bool) -> Result<Self, String> {
        let (tx, rx) = crossbeam_channel::bounded(FRAME_BUFFER);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
        let closed = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let thread_finished = Arc::clone(&finished);
        let filter = DecodeFilter {
            tx,
            closed: Arc::clone(&closed),
            block_when_full,
            decoded: 0,
            dropped: 0,
        };

        thread::Builder::new()
            .name("ffmpeg-decode".to_string())
            .spawn(move || {
                let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
                let pipe = pipe.filter("decode", Box::new(filter));
                let out = create_null_output().add_frame_pipeline(pipe);

                let ctx = match FfmpegContext::builder()
                    .input(input)
                    .filter_desc("format=yuv420p")
                    .output(out)
                    .build()
                {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("ffmpeg build failed: {}", e)));
                        return;
                    }
                };
                let sch = match ctx.start() {
                    Ok(sch) => sch,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("ffmpeg start failed: {}", e)));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let _ = sch.wait();
                thread_finished.store(true, Ordering::Relaxed);
                debug!("📹 解码循环结束");
            })
            .map_err(|e| format!("failed to spawn decode thread: {}", e))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                rx: Some(rx),
                closed,
                finished,
                received: AtomicU64::new(0),
                info,
            }),
            Ok(Err(reason)) => Err(reason),
            Err(_) => {
                closed.store(true, Ordering::Relaxed);
                Err("ffmpeg did not start in time".to_string())
            }
        }
    }
}

/// 读取文件元数据 (帧率/总帧数/分辨率), 失败时返回空信息
fn probe_file(url: &str) -> StreamInfo {
    match ez_ffmpeg::stream_info::find_video_stream_info(url) {
        Ok(Some(ez_ffmpeg::stream_info::StreamInfo::Video {
            fps,
            nb_frames,
            width,
            height,
            ..
        })) => StreamInfo {
            fps: Some(fps),
            total_frames: (nb_frames > 0).then_some(nb_frames as u64),
            width: width.max(0) as u32,
            height: height.max(0) as u32,
        },
        Ok(_) => StreamInfo::default(),
        Err(e) => {
            warn!("⚠️ 读取视频元数据失败: {}", e);
            StreamInfo::default()
        }
    }
}

impl FrameReader for FfmpegReader {
    fn info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn read(&mut self) -> Result<RgbaImage, String> {
        let rx = self.rx.as_ref().ok_or_else(|| "source closed".to_string())?;
        match rx.recv_timeout(READ_TIMEOUT) {
            Ok(image) => {
                self.received.fetch_add(1, Ordering::Relaxed);
                Ok(image)
            }
            Err(RecvTimeoutError::Timeout) => Err("decoder timeout".to_string()),
            Err(RecvTimeoutError::Disconnected) => Err("decoder finished".to_string()),
        }
    }

    fn position(&self) -> Option<u64> {
        let received = self.received.load(Ordering::Relaxed);
        let drained = self.rx.as_ref().map_or(true, |rx| rx.is_empty());
        // 解码线程已退出且通道已空: 流已读完 (解码失败的帧也算已消耗)
        if self.finished.load(Ordering::Relaxed) && drained {
            return Some(self.info.total_frames.map_or(received, |t| t.max(received)));
        }
        Some(received)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        // 丢弃接收端, 阻塞中的解码滤镜随即返回错误
        self.rx = None;
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strides_fit_odd_width() {
        assert!(strides_fit(640, 640, 320));
        assert!(!strides_fit(640, 639, 320));
        assert!(!strides_fit(641, 641, 320));
        assert!(strides_fit(641, 641, 321));
    }
}
