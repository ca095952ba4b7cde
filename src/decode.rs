// 该文件是 Qinghong （青红） 项目的一部分。
// src/decode.rs - 推理输出解码
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;
use tracing::debug;

use crate::{registry::ClassRegistry, tensor::RawOutput};

/// 渲染面上的像素坐标检测框
#[derive(Debug, Clone, PartialEq)]
pub struct BBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

/// 解码后的单个检测结果，每个处理周期重新构造，不跨周期保留。
#[derive(Debug, Clone)]
pub struct Detection {
  pub class_id: u32,
  pub label: String,
  /// 置信度，已四舍五入到 4 位小数供显示
  pub score: f32,
  pub bbox: BBox,
}

#[derive(Error, Debug)]
pub enum DecodeError {
  /// 类别表中不存在的类别 ID。这通常意味着模型与类别表版本不匹配，
  /// 必须立即暴露，而不是丢弃或渲染错误标签。
  #[error("未知类别 ID: {0}")]
  UnknownClassId(u32),
}

/// 将一次推理的原始输出解码为检测列表。
///
/// 按引擎返回的候选顺序 0..N 迭代，置信度严格大于阈值才保留
/// （比较使用未舍入的原始值）。归一化坐标先收拢到 [0, 1] 再
/// 反归一化到渲染面像素。不做 NMS、不做去重：重叠框是引擎
/// 输出的固有性质。
///
/// `raw` 按值传入，函数返回时（包括错误路径）输出张量随之释放。
pub fn decode(
  raw: RawOutput,
  threshold: f32,
  registry: &ClassRegistry,
  render_width: u32,
  render_height: u32,
) -> Result<Vec<Detection>, DecodeError> {
  let candidates = raw.candidates();
  let boxes = raw.boxes.data();
  let scores = raw.scores.data();
  let classes = raw.classes.data();

  let render_w = render_width as f32;
  let render_h = render_height as f32;

  let mut detections = Vec::new();
  for i in 0..candidates {
    let score = scores[i];
    if score <= threshold {
      continue;
    }

    let class_id = classes[i];
    let entry = registry
      .get(class_id)
      .ok_or(DecodeError::UnknownClassId(class_id))?;

    let min_y = boxes[i * 4].clamp(0.0, 1.0) * render_h;
    let min_x = boxes[i * 4 + 1].clamp(0.0, 1.0) * render_w;
    let max_y = boxes[i * 4 + 2].clamp(0.0, 1.0) * render_h;
    let max_x = boxes[i * 4 + 3].clamp(0.0, 1.0) * render_w;

    detections.push(Detection {
      class_id,
      label: entry.name.clone(),
      score: round_score(score),
      bbox: BBox {
        x: min_x,
        y: min_y,
        width: max_x - min_x,
        height: max_y - min_y,
      },
    });
  }

  debug!("解码出 {} 个检测（候选 {} 个）", detections.len(), candidates);

  Ok(detections)
}

fn round_score(score: f32) -> f32 {
  (score * 10000.0).round() / 10000.0
}
