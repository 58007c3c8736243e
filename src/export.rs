// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 导出已标注的帧序列

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::info;

/// 帧率缺失或非正时使用
pub const DEFAULT_EXPORT_FPS: f64 = 30.0;

pub trait Exporter {
    /// 按顺序导出帧, 返回写出的清单
    fn export(&self, frames: &[Arc<RgbaImage>], fps: f64) -> Result<ExportManifest>;
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExportManifest {
    pub fps: f64,
    pub frames: usize,
    pub width: u32,
    pub height: u32,
    pub created_at: String,
    pub pattern: String,
}

/// PNG 序列 + manifest.json
pub struct ImageSequenceExporter {
    dir: PathBuf,
}

impl ImageSequenceExporter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("frame_{:06}.png", index))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join("manifest.json")
    }
}

impl Exporter for ImageSequenceExporter {
    fn export(&self, frames: &[Arc<RgbaImage>], fps: f64) -> Result<ExportManifest> {
        let Some(first) = frames.first() else {
            bail!("no annotated frames to export");
        };
        let fps = if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            DEFAULT_EXPORT_FPS
        };

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        for (index, frame) in frames.iter().enumerate() {
            let path = self.frame_path(index);
            frame
                .save(&path)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        let manifest = ExportManifest {
            fps,
            frames: frames.len(),
            width: first.width(),
            height: first.height(),
            created_at: chrono::Local::now().to_rfc3339(),
            pattern: "frame_%06d.png".to_string(),
        };
        fs::write(self.manifest_path(), serde_json::to_string_pretty(&manifest)?)
            .context("failed to write manifest.json")?;

        info!(
            "💾 已导出 {} 帧 ({:.1}fps) 到 {}",
            manifest.frames,
            manifest.fps,
            self.dir.display()
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn frames(n: u8) -> Vec<Arc<RgbaImage>> {
        (0..n)
            .map(|i| Arc::new(RgbaImage::from_pixel(4, 3, Rgba([i, 0, 0, 255]))))
            .collect()
    }

    #[test]
    fn test_export_writes_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ImageSequenceExporter::new(dir.path().join("out"));
        let manifest = exporter.export(&frames(3), 12.5).unwrap();
        assert_eq!(manifest.frames, 3);
        assert_eq!((manifest.width, manifest.height), (4, 3));
        assert_eq!(manifest.fps, 12.5);

        for i in 0..3u8 {
            let img = image::open(exporter.frame_path(i as usize)).unwrap().to_rgba8();
            assert_eq!(img.get_pixel(0, 0)[0], i);
        }
        let json = fs::read_to_string(exporter.manifest_path()).unwrap();
        let parsed: ExportManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_non_positive_fps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ImageSequenceExporter::new(dir.path());
        assert_eq!(exporter.export(&frames(1), 0.0).unwrap().fps, DEFAULT_EXPORT_FPS);
        assert_eq!(exporter.export(&frames(1), -5.0).unwrap().fps, DEFAULT_EXPORT_FPS);
    }

    #[test]
    fn test_empty_export_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceExporter::new(dir.path()).export(&[], 25.0).is_err());
    }
}
