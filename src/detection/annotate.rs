// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测框标注

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::info;

use crate::error::LoadError;
use crate::frame::Detection;

/// 高亮颜色表 (按类别循环)
const BRIGHT_COLORS: [(u8, u8, u8); 12] = [
    (255, 0, 0),     // 红色
    (0, 255, 0),     // 绿色
    (0, 0, 255),     // 蓝色
    (255, 255, 0),   // 黄色
    (255, 0, 255),   // 品红
    (0, 255, 255),   // 青色
    (255, 128, 0),   // 橙色
    (255, 0, 128),   // 粉红
    (128, 255, 0),   // 黄绿
    (0, 128, 255),   // 天蓝
    (255, 255, 255), // 白色
    (128, 0, 255),   // 紫色
];

/// 在帧副本上绘制检测框和标签; 没有字体时只画框和色块
pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
    thickness: i32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            scale: PxScale::from(18.0),
            thickness: 2,
        }
    }
}

impl Annotator {
    /// 加载 TTF/OTF 字体用于绘制标签
    pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|_| LoadError::NotFound(path.to_path_buf()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| LoadError::Backend(format!("invalid font {}: {}", path.display(), e)))?;
        info!("🔤 标注字体: {}", path.display());
        Ok(Self {
            font: Some(font),
            ..Default::default()
        })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn color_for(class_id: usize) -> Rgba<u8> {
        let (r, g, b) = BRIGHT_COLORS[class_id % BRIGHT_COLORS.len()];
        Rgba([r, g, b, 255])
    }

    pub fn annotate(&self, image: &RgbaImage, detections: &[Detection]) -> RgbaImage {
        let mut canvas = image.clone();
        let (w, h) = canvas.dimensions();
        if w == 0 || h == 0 {
            return canvas;
        }

        for det in detections {
            let color = Self::color_for(det.class_id);
            let x1 = det.region.x.max(0.0).min((w - 1) as f32) as i32;
            let y1 = det.region.y.max(0.0).min((h - 1) as f32) as i32;
            let bw = (det.region.width.max(1.0) as u32).min(w - x1 as u32).max(1);
            let bh = (det.region.height.max(1.0) as u32).min(h - y1 as u32).max(1);

            // 多次绘制实现粗边框
            for offset in 0..self.thickness {
                let inner_w = bw.saturating_sub(2 * offset as u32);
                let inner_h = bh.saturating_sub(2 * offset as u32);
                if inner_w == 0 || inner_h == 0 {
                    break;
                }
                let rect = Rect::at(x1 + offset, y1 + offset).of_size(inner_w, inner_h);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }

            let label = format!("{} {:.2}", det.label, det.confidence);
            self.draw_label(&mut canvas, &label, x1, y1, color);
        }
        canvas
    }

    fn draw_label(&self, canvas: &mut RgbaImage, label: &str, x: i32, y: i32, color: Rgba<u8>) {
        match &self.font {
            Some(font) => {
                let (tw, th) = text_size(self.scale, font, label);
                let top = (y - th as i32 - 4).max(0);
                let bg = Rect::at(x, top).of_size(tw.max(1) + 4, th.max(1) + 4);
                draw_filled_rect_mut(canvas, bg, color);
                draw_text_mut(canvas, Rgba([0, 0, 0, 255]), x + 2, top + 2, self.scale, font, label);
            }
            None => {
                let top = (y - 6).max(0);
                draw_filled_rect_mut(canvas, Rect::at(x, top).of_size(12, 6), color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Region;

    #[test]
    fn test_box_drawn_in_class_color() {
        let image = RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 255]));
        let det = Detection {
            label: "car".into(),
            class_id: 2,
            confidence: 0.8,
            region: Region::new(10.0, 10.0, 20.0, 20.0),
        };
        let out = Annotator::default().annotate(&image, &[det]);
        let blue = Annotator::color_for(2);
        assert_eq!(*out.get_pixel(10, 20), blue);
        assert_eq!(*out.get_pixel(29, 20), blue);
        // 框内不填充
        assert_eq!(*out.get_pixel(20, 20), Rgba([0, 0, 0, 255]));
        // 原图不变
        assert_eq!(*image.get_pixel(10, 20), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_palette_wraps() {
        assert_eq!(Annotator::color_for(0), Annotator::color_for(12));
        assert_ne!(Annotator::color_for(0), Annotator::color_for(1));
    }

    #[test]
    fn test_out_of_bounds_region_is_clamped() {
        let image = RgbaImage::new(8, 8);
        let det = Detection {
            label: "x".into(),
            class_id: 0,
            confidence: 1.0,
            region: Region::new(-5.0, 6.0, 100.0, 100.0),
        };
        let out = Annotator::default().annotate(&image, &[det]);
        assert_eq!(out.dimensions(), (8, 8));
    }

    #[test]
    fn test_missing_font_file() {
        let err = Annotator::with_font_file("/no/such/font.ttf").err().unwrap();
        assert!(matches!(err, LoadError::NotFound(_)));
    }
}
