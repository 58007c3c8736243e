// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统 (Detection System)
///
/// 检测线程独占的推理模型
/// - Detector:       单帧检测接口 (MotionDetector / YoloOnnx)
/// - ModelLoader:    按需加载检测器 (start() 时加载, 失败则会话不启动)
/// - DetectionModel: 检测器 + 过滤条件 + 标注器, 一次推理产出一个 DetectionResult
pub mod annotate;
pub mod motion;

#[cfg(feature = "onnx")]
pub mod onnx;

use std::sync::Arc;
use std::time::Instant;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, LoadError};
use crate::frame::{Detection, DetectionResult, Frame};

pub use annotate::Annotator;
pub use motion::MotionDetector;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxLoader, YoloOnnx};

/// 单帧检测器
pub trait Detector: Send {
    fn name(&self) -> &str;

    /// 检测一帧, 坐标为原始帧像素坐标
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, InferenceError>;
}

/// 检测器加载器
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn Detector>, LoadError>;
}

impl<F> ModelLoader for F
where
    F: Fn() -> Result<Box<dyn Detector>, LoadError> + Send + Sync,
{
    fn load(&self) -> Result<Box<dyn Detector>, LoadError> {
        self()
    }
}

/// 检测结果过滤条件
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionFilter {
    pub min_confidence: f32,         // 最低置信度
    pub classes: Option<Vec<usize>>, // 只保留这些类别 (None = 全部)
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            min_confidence: 0.25,
            classes: None,
        }
    }
}

impl DetectionFilter {
    pub fn accepts(&self, det: &Detection) -> bool {
        det.confidence >= self.min_confidence
            && self
                .classes
                .as_ref()
                .map_or(true, |classes| classes.contains(&det.class_id))
    }

    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections.into_iter().filter(|d| self.accepts(d)).collect()
    }
}

/// 非极大值抑制: 按置信度降序, 丢弃与已保留框 IoU 超过阈值的框
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].region.iou(&xs[index].region) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 已加载的检测模型
pub struct DetectionModel {
    detector: Box<dyn Detector>,
    filter: DetectionFilter,
    annotator: Arc<Annotator>,
}

impl DetectionModel {
    pub fn new(detector: Box<dyn Detector>, filter: DetectionFilter, annotator: Arc<Annotator>) -> Self {
        Self {
            detector,
            filter,
            annotator,
        }
    }

    pub fn name(&self) -> &str {
        self.detector.name()
    }

    /// 推理 + 过滤 + 标注
    pub fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, InferenceError> {
        let t = Instant::now();
        let detections = self.filter.apply(self.detector.detect(&frame.image)?);
        let annotated = self.annotator.annotate(&frame.image, &detections);

        Ok(DetectionResult {
            seq: frame.seq,
            epoch: frame.epoch,
            annotated: Arc::new(annotated),
            detections,
            inference_ms: t.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 测试用检测器
    use super::*;
    use crate::frame::Region;
    use std::thread;
    use std::time::Duration;

    /// 固定耗时, 每帧返回一个固定标签; `fail_every > 0` 时每第 n 次调用失败
    pub struct SleepyDetector {
        pub delay: Duration,
        pub label: &'static str,
        pub fail_every: u64,
        pub calls: u64,
    }

    impl Detector for SleepyDetector {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, InferenceError> {
            thread::sleep(self.delay);
            self.calls += 1;
            if self.fail_every > 0 && self.calls % self.fail_every == 0 {
                return Err(InferenceError::new("boom"));
            }
            Ok(vec![Detection {
                label: self.label.to_string(),
                class_id: 0,
                confidence: 0.9,
                region: Region::new(0.0, 0.0, image.width() as f32, image.height() as f32),
            }])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::SleepyDetector;
    use super::*;
    use crate::frame::Region;
    use std::time::Duration;

    fn det(class_id: usize, confidence: f32, x: f32) -> Detection {
        Detection {
            label: format!("c{class_id}"),
            class_id,
            confidence,
            region: Region::new(x, 0.0, 10.0, 10.0),
        }
    }

    #[test]
    fn test_filter_confidence_and_classes() {
        let filter = DetectionFilter {
            min_confidence: 0.5,
            classes: Some(vec![1]),
        };
        let kept = filter.apply(vec![det(1, 0.9, 0.0), det(1, 0.3, 0.0), det(2, 0.9, 0.0)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class_id, 1);
        assert!(DetectionFilter::default().accepts(&det(7, 0.25, 0.0)));
    }

    #[test]
    fn test_nms_keeps_highest_confidence() {
        let mut xs = vec![det(0, 0.6, 1.0), det(0, 0.9, 0.0), det(0, 0.8, 50.0)];
        non_max_suppression(&mut xs, 0.45);
        let confs: Vec<f32> = xs.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.8]);
    }

    #[test]
    fn test_closure_loader() {
        let loader = || -> Result<Box<dyn Detector>, LoadError> {
            Ok(Box::new(MotionDetector::default()))
        };
        assert_eq!(loader.load().unwrap().name(), "motion");

        let failing = || -> Result<Box<dyn Detector>, LoadError> {
            Err(LoadError::Backend("no weights".into()))
        };
        assert!(ModelLoader::load(&failing).is_err());
    }

    #[test]
    fn test_infer_carries_frame_identity() {
        let detector = SleepyDetector {
            delay: Duration::ZERO,
            label: "person",
            fail_every: 0,
            calls: 0,
        };
        let mut model = DetectionModel::new(
            Box::new(detector),
            DetectionFilter::default(),
            Arc::new(Annotator::default()),
        );
        let frame = Frame::new(42, 3, RgbaImage::new(16, 12));
        let result = model.infer(&frame).unwrap();
        assert_eq!((result.seq, result.epoch), (42, 3));
        assert_eq!(result.unique_labels(), vec!["person"]);
        assert_eq!(result.annotated.dimensions(), (16, 12));
    }
}
