// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测线程 (DetectionWorker)
//! 职责: 从队列取帧 → 推理 → 发送检测结果; 逐帧错误只记录, 不中断循环

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info};

use super::{PipelineStats, Shared};
use crate::frame::Frame;

pub(crate) fn run(shared: Arc<Shared>) {
    info!("🔍 检测线程启动");
    let timeout = shared.config.pop_timeout();

    while !shared.shutdown.load(Ordering::Relaxed) {
        let Some(frame) = shared.queue.pop(timeout) else {
            continue;
        };
        process(&shared, frame);
    }
    info!("🔍 检测线程退出");
}

fn process(shared: &Shared, frame: Frame) {
    let stats = &shared.stats;

    // 会话已停止或已重启: 不再推理
    if !shared.is_current(frame.epoch) {
        PipelineStats::bump(&stats.stale_discarded);
        debug!("丢弃过期帧 #{} (epoch {})", frame.seq, frame.epoch);
        return;
    }

    let mut slot = shared.lock_model();
    let outcome = match slot.as_mut() {
        Some(model) => model.infer(&frame),
        None => {
            PipelineStats::bump(&stats.stale_discarded);
            debug!("模型未加载, 丢弃帧 #{}", frame.seq);
            return;
        }
    };
    drop(slot);

    match outcome {
        Ok(result) => {
            PipelineStats::bump(&stats.inferred);
            // 推理期间会话可能已结束
            if !shared.is_current(result.epoch) {
                PipelineStats::bump(&stats.stale_discarded);
                debug!("丢弃过期结果 #{} (epoch {})", result.seq, result.epoch);
                return;
            }

            let labels = result.unique_labels().join(", ");
            debug!(
                "帧 #{} 推理 {:.1}ms, {} 个目标",
                result.seq,
                result.inference_ms,
                result.detections.len()
            );
            shared.sink.deliver_annotated(result);
            PipelineStats::bump(&stats.delivered);
            if !labels.is_empty() {
                shared.log(format!("检测到: {}", labels));
            }
        }
        Err(e) => {
            PipelineStats::bump(&stats.inference_errors);
            shared.log_warn(format!("⚠️ 帧 #{} 推理失败: {}", frame.seq, e));
        }
    }
}
