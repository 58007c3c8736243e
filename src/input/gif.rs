// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! GIF 动图读取

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, RgbaImage};
use tracing::debug;

use super::{FrameReader, StreamInfo};
use crate::error::OpenError;

/// 打开时一次性解码所有帧
pub struct GifReader {
    frames: VecDeque<RgbaImage>,
    info: StreamInfo,
    total: u64,
}

impl GifReader {
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        let file_err = |reason: String| OpenError::File {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| file_err(e.to_string()))?;
        let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| file_err(e.to_string()))?;
        let frames = decoder
            .into_frames()
            .collect_frames()
            .map_err(|e| file_err(e.to_string()))?;

        // 帧率取第一帧的延时, 延时为0表示帧率缺失
        let fps = frames.first().and_then(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            if numer == 0 {
                None
            } else {
                Some(1000.0 * denom as f64 / numer as f64)
            }
        });

        let frames: VecDeque<RgbaImage> = frames.into_iter().map(|f| f.into_buffer()).collect();
        let (width, height) = frames.front().map(|f| f.dimensions()).unwrap_or((0, 0));
        let total = frames.len() as u64;
        debug!("GIF 解码完成: {} 帧, {}x{}, fps={:?}", total, width, height, fps);

        Ok(Self {
            frames,
            info: StreamInfo {
                fps,
                total_frames: Some(total),
                width,
                height,
            },
            total,
        })
    }
}

impl FrameReader for GifReader {
    fn info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn read(&mut self) -> Result<RgbaImage, String> {
        self.frames
            .pop_front()
            .ok_or_else(|| "no more frames".to_string())
    }

    fn position(&self) -> Option<u64> {
        Some(self.total - self.frames.len() as u64)
    }

    fn close(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba};

    fn write_gif(path: &Path, count: u8, delay_ms: u32) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        let frames = (0..count).map(|i| {
            let buffer = RgbaImage::from_pixel(8, 6, Rgba([i * 40, 0, 0, 255]));
            Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1))
        });
        encoder.encode_frames(frames).unwrap();
    }

    #[test]
    fn test_gif_frames_and_fps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.gif");
        write_gif(&path, 3, 100);

        let mut reader = GifReader::open(&path).unwrap();
        let info = reader.info();
        assert_eq!(info.total_frames, Some(3));
        assert_eq!((info.width, info.height), (8, 6));
        let fps = info.fps.unwrap();
        assert!((fps - 10.0).abs() < 0.5);

        for expected in 1..=3 {
            assert!(reader.read().is_ok());
            assert_eq!(reader.position(), Some(expected));
        }
        assert!(reader.read().is_err());
    }

    #[test]
    fn test_missing_gif() {
        let dir = tempfile::tempdir().unwrap();
        let err = GifReader::open(&dir.path().join("none.gif")).err().unwrap();
        assert!(matches!(err, OpenError::File { .. }));
    }
}
