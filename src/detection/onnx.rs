// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 ONNX 检测器
// 包含: 模型加载、预处理、推理、后处理

use std::path::{Path, PathBuf};

use fast_image_resize as fr;
use image::RgbaImage;
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::{non_max_suppression, Detector, ModelLoader};
use crate::error::{InferenceError, LoadError};
use crate::frame::{Detection, Region};

/// 推理输入尺寸
pub const INF_SIZE: u32 = 640;
/// 候选框置信度下限 (最终过滤由 DetectionFilter 负责)
const CONF_THRESHOLD: f32 = 0.10;
const IOU_THRESHOLD: f32 = 0.45;

pub const COCO_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// YOLOv8 检测模型 (输出 [1, 4 + nc, N])
pub struct YoloOnnx {
    session: Session,
    names: Vec<String>,
    resizer: fr::Resizer,
}

impl YoloOnnx {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }
        let session = Session::builder()
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| LoadError::Backend(e.to_string()))?;
        info!("✅ 模型加载完成: {}", path.display());
        Ok(Self {
            session,
            names: COCO_NAMES.iter().map(|s| s.to_string()).collect(),
            resizer: fr::Resizer::new(),
        })
    }

    /// 缩放到 640x640, 转换为 NCHW [0, 1] 张量数据
    fn preprocess(&mut self, image: &RgbaImage) -> Result<Vec<f32>, InferenceError> {
        let src = fr::images::Image::from_vec_u8(
            image.width(),
            image.height(),
            image.as_raw().clone(),
            fr::PixelType::U8x4,
        )
        .map_err(|e| InferenceError::new(format!("resize source: {}", e)))?;
        let mut dst = fr::images::Image::new(INF_SIZE, INF_SIZE, fr::PixelType::U8x4);
        let options =
            fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .map_err(|e| InferenceError::new(format!("resize: {}", e)))?;

        let raw = dst.buffer();
        let size = (INF_SIZE * INF_SIZE) as usize;
        let mut tensor = vec![0f32; 3 * size];
        for idx in 0..size {
            tensor[idx] = raw[idx * 4] as f32 / 255.0;
            tensor[size + idx] = raw[idx * 4 + 1] as f32 / 255.0;
            tensor[2 * size + idx] = raw[idx * 4 + 2] as f32 / 255.0;
        }
        Ok(tensor)
    }
}

impl Detector for YoloOnnx {
    fn name(&self) -> &str {
        "yolov8"
    }

    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, InferenceError> {
        let data = self.preprocess(image)?;
        let shape = [1usize, 3, INF_SIZE as usize, INF_SIZE as usize];
        let input = Tensor::from_array((shape, data.into_boxed_slice()))
            .map_err(|e| InferenceError::new(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs!["images" => input])
            .map_err(|e| InferenceError::new(e.to_string()))?;
        let (out_shape, preds) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::new(e.to_string()))?;

        if out_shape.len() != 3 || out_shape[1] < 5 {
            return Err(InferenceError::new(format!(
                "unexpected output shape {:?}",
                out_shape
            )));
        }
        let rows = out_shape[1] as usize;
        let num_proposals = out_shape[2] as usize;
        let nc = rows - 4;

        let scale_x = image.width() as f32 / INF_SIZE as f32;
        let scale_y = image.height() as f32 / INF_SIZE as f32;
        let (w, h) = (image.width() as f32, image.height() as f32);

        let mut detections = Vec::new();
        for i in 0..num_proposals {
            // 布局: [cx, cy, w, h, cls0, cls1, ...] 按行存储
            let (class_id, confidence) = (0..nc)
                .map(|c| (c, preds[(4 + c) * num_proposals + i]))
                .fold((0, f32::MIN), |best, x| if x.1 > best.1 { x } else { best });
            if confidence < CONF_THRESHOLD {
                continue;
            }

            let cx = preds[i] * scale_x;
            let cy = preds[num_proposals + i] * scale_y;
            let bw = preds[2 * num_proposals + i] * scale_x;
            let bh = preds[3 * num_proposals + i] * scale_y;
            detections.push(Detection {
                label: self
                    .names
                    .get(class_id)
                    .cloned()
                    .unwrap_or_else(|| format!("class{}", class_id)),
                class_id,
                confidence,
                region: Region::from_xyxy(
                    (cx - bw / 2.0).max(0.0),
                    (cy - bh / 2.0).max(0.0),
                    (cx + bw / 2.0).min(w),
                    (cy + bh / 2.0).min(h),
                ),
            });
        }

        non_max_suppression(&mut detections, IOU_THRESHOLD);
        debug!("推理完成: {} 个目标", detections.len());
        Ok(detections)
    }
}

/// 从 ONNX 文件加载 YOLOv8 检测器
#[derive(Clone, Debug)]
pub struct OnnxLoader {
    pub path: PathBuf,
}

impl ModelLoader for OnnxLoader {
    fn load(&self) -> Result<Box<dyn super::Detector>, LoadError> {
        Ok(Box::new(YoloOnnx::load(&self.path)?))
    }
}
