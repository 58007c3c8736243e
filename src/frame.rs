// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 帧与检测结果数据结构
//! Data structures shared by capture, detection and presentation

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use image::RgbaImage;

/// 采集帧 (采集线程 → 显示 + 检测队列)
#[derive(Clone, Debug)]
pub struct Frame {
    pub seq: u64,                    // 会话内帧序号, 严格递增
    pub epoch: u64,                  // 所属会话代数
    pub captured_at: Instant,        // 采集时刻
    pub timestamp: DateTime<Local>,  // 墙钟时间 (用于日志)
    pub image: Arc<RgbaImage>,       // 使用Arc共享数据,避免复制
}

impl Frame {
    pub fn new(seq: u64, epoch: u64, image: RgbaImage) -> Self {
        Self {
            seq,
            epoch,
            captured_at: Instant::now(),
            timestamp: Local::now(),
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 检测区域 (原始帧像素坐标)
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn xmax(&self) -> f32 {
        self.x + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &Region) -> f32 {
        let l = self.x.max(other.x);
        let r = self.xmax().min(other.xmax());
        let t = self.y.max(other.y);
        let b = self.ymax().min(other.ymax());
        let inter = (r - l).max(0.0) * (b - t).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// 单个检测目标
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    pub class_id: usize,
    pub confidence: f32,
    pub region: Region,
}

/// 检测结果 (检测线程 → 显示)
///
/// 每次推理产生一次, 创建后不再修改。
#[derive(Clone, Debug)]
pub struct DetectionResult {
    pub seq: u64,                  // 对应的帧序号
    pub epoch: u64,                // 对应的会话代数
    pub annotated: Arc<RgbaImage>, // 标注后的图像
    pub detections: Vec<Detection>,
    pub inference_ms: f64,
}

impl DetectionResult {
    /// 去重后的类别名称 (按首次出现顺序)
    pub fn unique_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for det in &self.detections {
            if !labels.contains(&det.label.as_str()) {
                labels.push(det.label.as_str());
            }
        }
        labels
    }
}
