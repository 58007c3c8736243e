// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 图片序列读取 (目录内按文件名排序, 或单张图片)

use std::path::{Path, PathBuf};

use image::RgbaImage;

use super::{FrameReader, StreamInfo};
use crate::error::OpenError;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct ImageSequenceReader {
    files: Vec<PathBuf>,
    index: usize,
    info: StreamInfo,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

impl ImageSequenceReader {
    /// 读取目录下所有图片, 目录为空视为不支持的输入
    pub fn open_dir(dir: &Path) -> Result<Self, OpenError> {
        let entries = std::fs::read_dir(dir).map_err(|e| OpenError::File {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(OpenError::Unsupported(dir.to_path_buf()));
        }
        Ok(Self::from_files(files))
    }

    /// 尺寸取自第一张图片的文件头
    pub fn from_files(files: Vec<PathBuf>) -> Self {
        let (width, height) = files
            .first()
            .and_then(|path| image::image_dimensions(path).ok())
            .unwrap_or((0, 0));
        let info = StreamInfo {
            fps: None,
            total_frames: Some(files.len() as u64),
            width,
            height,
        };
        Self {
            files,
            index: 0,
            info,
        }
    }
}

impl FrameReader for ImageSequenceReader {
    fn info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn read(&mut self) -> Result<RgbaImage, String> {
        let path = self
            .files
            .get(self.index)
            .ok_or_else(|| "no more images".to_string())?;
        // 解码失败的图片也算已消耗, 不会卡在同一张上
        self.index += 1;
        image::open(path)
            .map(|img| img.to_rgba8())
            .map_err(|e| format!("{}: {}", path.display(), e))
    }

    fn position(&self) -> Option<u64> {
        Some(self.index as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_directory_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("b.png", 20u8), ("a.png", 10), ("c.png", 30)] {
            RgbaImage::from_pixel(3, 2, Rgba([shade, 0, 0, 255]))
                .save(dir.path().join(name))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut reader = ImageSequenceReader::open_dir(dir.path()).unwrap();
        assert_eq!(reader.info().total_frames, Some(3));
        assert_eq!((reader.info().width, reader.info().height), (3, 2));

        let shades: Vec<u8> = (0..3).map(|_| reader.read().unwrap().get_pixel(0, 0)[0]).collect();
        assert_eq!(shades, vec![10, 20, 30]);
        assert!(reader.read().is_err());
        assert_eq!(reader.position(), Some(3));
    }

    #[test]
    fn test_corrupt_image_is_consumed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0.png"), b"not a png").unwrap();
        RgbaImage::new(2, 2).save(dir.path().join("1.png")).unwrap();

        let mut reader = ImageSequenceReader::open_dir(dir.path()).unwrap();
        assert!(reader.read().is_err());
        assert!(reader.read().is_ok());
        assert_eq!(reader.position(), Some(2));
    }

    #[test]
    fn test_empty_directory_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImageSequenceReader::open_dir(dir.path()).err().unwrap();
        assert!(matches!(err, OpenError::Unsupported(_)));
    }
}
