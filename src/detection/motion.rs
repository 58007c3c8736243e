// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 帧差运动检测 (无需模型文件)
//!
//! 灰度图按 `cell` 像素分块, 与上一帧逐块比较平均亮度差,
//! 超过阈值的块做 8 连通标记, 每个连通区域输出一个 "motion" 检测框。

use image::imageops::grayscale;
use image::{GrayImage, Luma, RgbaImage};
use imageproc::region_labelling::{connected_components, Connectivity};

use super::{non_max_suppression, Detector};
use crate::error::InferenceError;
use crate::frame::{Detection, Region};

pub const MOTION_LABEL: &str = "motion";

pub struct MotionDetector {
    cell: u32,       // 分块大小 (像素)
    threshold: f32,  // 块平均亮度差阈值 (0-255)
    min_cells: u32,  // 区域最少块数
    previous: Option<Vec<f32>>,
    grid: (u32, u32),
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new(16, 18.0, 1)
    }
}

impl MotionDetector {
    pub fn new(cell: u32, threshold: f32, min_cells: u32) -> Self {
        Self {
            cell: cell.max(1),
            threshold: threshold.max(1.0),
            min_cells: min_cells.max(1),
            previous: None,
            grid: (0, 0),
        }
    }

    /// 各块平均亮度
    fn cell_means(&self, gray: &GrayImage) -> (Vec<f32>, (u32, u32)) {
        let (w, h) = gray.dimensions();
        let gw = w.div_ceil(self.cell);
        let gh = h.div_ceil(self.cell);
        let mut sums = vec![0f32; (gw * gh) as usize];
        let mut counts = vec![0u32; (gw * gh) as usize];
        for (x, y, Luma([v])) in gray.enumerate_pixels() {
            let idx = ((y / self.cell) * gw + x / self.cell) as usize;
            sums[idx] += *v as f32;
            counts[idx] += 1;
        }
        for (sum, count) in sums.iter_mut().zip(counts) {
            *sum /= count.max(1) as f32;
        }
        (sums, (gw, gh))
    }
}

impl Detector for MotionDetector {
    fn name(&self) -> &str {
        "motion"
    }

    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, InferenceError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(InferenceError::new("empty frame"));
        }
        let (means, grid) = self.cell_means(&grayscale(image));

        // 首帧或分辨率变化: 只记录背景
        let previous = match self.previous.replace(means.clone()) {
            Some(prev) if self.grid == grid => prev,
            _ => {
                self.grid = grid;
                return Ok(Vec::new());
            }
        };

        let (gw, gh) = grid;
        let diffs: Vec<f32> = means
            .iter()
            .zip(&previous)
            .map(|(a, b)| (a - b).abs())
            .collect();
        let mask = GrayImage::from_fn(gw, gh, |x, y| {
            if diffs[(y * gw + x) as usize] >= self.threshold {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

        // label → (xmin, ymin, xmax, ymax, cells, diff_sum)
        let mut regions: Vec<(u32, u32, u32, u32, u32, f32)> = Vec::new();
        for (x, y, Luma([label])) in labels.enumerate_pixels() {
            if *label == 0 {
                continue;
            }
            let idx = *label as usize - 1;
            if regions.len() <= idx {
                regions.resize(idx + 1, (u32::MAX, u32::MAX, 0, 0, 0, 0.0));
            }
            let r = &mut regions[idx];
            r.0 = r.0.min(x);
            r.1 = r.1.min(y);
            r.2 = r.2.max(x);
            r.3 = r.3.max(y);
            r.4 += 1;
            r.5 += diffs[(y * gw + x) as usize];
        }

        let (w, h) = (image.width() as f32, image.height() as f32);
        let cell = self.cell as f32;
        let mut detections: Vec<Detection> = regions
            .into_iter()
            .filter(|r| r.4 >= self.min_cells)
            .map(|(x0, y0, x1, y1, cells, diff_sum)| {
                let mean_diff = diff_sum / cells as f32;
                Detection {
                    label: MOTION_LABEL.to_string(),
                    class_id: 0,
                    confidence: (mean_diff / (2.0 * self.threshold)).min(1.0),
                    region: Region::from_xyxy(
                        x0 as f32 * cell,
                        y0 as f32 * cell,
                        ((x1 + 1) as f32 * cell).min(w),
                        ((y1 + 1) as f32 * cell).min(h),
                    ),
                }
            })
            .collect();
        non_max_suppression(&mut detections, 0.5);
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn background() -> RgbaImage {
        RgbaImage::from_pixel(64, 48, Rgba([20, 20, 20, 255]))
    }

    #[test]
    fn test_first_frame_has_no_motion() {
        let mut detector = MotionDetector::default();
        assert!(detector.detect(&background()).unwrap().is_empty());
        assert!(detector.detect(&background()).unwrap().is_empty());
    }

    #[test]
    fn test_bright_square_is_detected() {
        let mut detector = MotionDetector::default();
        detector.detect(&background()).unwrap();

        let mut moved = background();
        for y in 16..32 {
            for x in 32..48 {
                moved.put_pixel(x, y, Rgba([250, 250, 250, 255]));
            }
        }
        let dets = detector.detect(&moved).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, MOTION_LABEL);
        assert_eq!(dets[0].region, Region::new(32.0, 16.0, 16.0, 16.0));
        assert!((dets[0].confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_two_separate_regions() {
        let mut detector = MotionDetector::default();
        detector.detect(&background()).unwrap();

        let mut moved = background();
        for y in 0..16 {
            for x in 0..16 {
                moved.put_pixel(x, y, Rgba([255, 255, 255, 255]));
                moved.put_pixel(x + 48, y + 32, Rgba([255, 255, 255, 255]));
            }
        }
        assert_eq!(detector.detect(&moved).unwrap().len(), 2);
    }

    #[test]
    fn test_resolution_change_resets_background() {
        let mut detector = MotionDetector::default();
        detector.detect(&background()).unwrap();
        let other = RgbaImage::from_pixel(32, 32, Rgba([255, 255, 255, 255]));
        assert!(detector.detect(&other).unwrap().is_empty());
    }
}
