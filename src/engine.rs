// 该文件是 Qinghong （青红） 项目的一部分。
// src/engine.rs - 推理引擎边界
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

use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  tensor::{InputTensor, RawOutput, ShapeError, Tensor},
};

/// 推理引擎。对本库而言引擎是不透明的：模型加载、权重与执行后端
/// 都在引擎内部，这里只依赖固定的输出张量形状约定。
///
/// `infer` 按值消费输入张量，调用返回时（无论成败）输入即被释放；
/// 输出张量分配在与输入相同的作用域内。
pub trait Engine {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, input: InputTensor) -> Result<RawOutput, Self::Error>;
}

/// 回放引擎：从 JSON 录制文件中逐帧回放预先记录的推理输出，
/// 录制播完后循环。用于演示与测试，替代需要联网加载的图模型。
///
/// 录制格式:
/// ```json
/// {
///   "candidates": 10,
///   "frames": [
///     {"boxes": [[0.1, 0.2, 0.3, 0.4]], "scores": [0.9], "classes": [1]}
///   ]
/// }
/// ```
/// 每帧候选不足 `candidates` 个时由引擎填充零分槽位，
/// 保证每次推理都返回固定的 N 个候选。
pub struct ReplayEngine {
  frames: Vec<ReplayFrame>,
  candidates: usize,
  cursor: AtomicUsize,
}

#[derive(Debug, Clone)]
struct ReplayFrame {
  boxes: Vec<[f32; 4]>,
  scores: Vec<f32>,
  classes: Vec<u32>,
}

#[derive(Error, Debug)]
pub enum ReplayEngineError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("录制文件无效: {0}")]
  BadRecording(String),
  #[error("张量构造失败: {0}")]
  Shape(#[from] ShapeError),
}

impl FromUrlWithScheme for ReplayEngine {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayEngine {
  type Error = ReplayEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayEngineError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    info!("加载推理录制文件: {}", url.path());
    let text = std::fs::read_to_string(url.path())?;
    Self::from_json(&text)
  }
}

impl ReplayEngine {
  pub fn from_json(text: &str) -> Result<Self, ReplayEngineError> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    let candidates = value
      .get("candidates")
      .and_then(|v| v.as_u64())
      .ok_or_else(|| bad_recording("缺少 candidates 字段"))? as usize;
    if candidates == 0 {
      return Err(bad_recording("candidates 必须大于 0"));
    }

    let frames = value
      .get("frames")
      .and_then(|v| v.as_array())
      .ok_or_else(|| bad_recording("缺少 frames 数组"))?;
    if frames.is_empty() {
      return Err(bad_recording("frames 数组为空"));
    }

    let frames = frames
      .iter()
      .map(|frame| parse_frame(frame, candidates))
      .collect::<Result<Vec<_>, _>>()?;

    debug!(
      "录制加载完成: {} 帧, 每帧 {} 个候选槽位",
      frames.len(),
      candidates
    );

    Ok(Self {
      frames,
      candidates,
      cursor: AtomicUsize::new(0),
    })
  }

  /// 模型每帧输出的固定候选槽位数 N
  pub fn candidates(&self) -> usize {
    self.candidates
  }
}

fn bad_recording(message: &str) -> ReplayEngineError {
  ReplayEngineError::BadRecording(message.to_string())
}

fn parse_frame(
  value: &serde_json::Value,
  candidates: usize,
) -> Result<ReplayFrame, ReplayEngineError> {
  let boxes = value
    .get("boxes")
    .and_then(|v| v.as_array())
    .ok_or_else(|| bad_recording("帧缺少 boxes"))?
    .iter()
    .map(|entry| {
      let coords: Vec<f32> = entry
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
        .unwrap_or_default();
      <[f32; 4]>::try_from(coords).map_err(|_| bad_recording("检测框应为 4 个坐标"))
    })
    .collect::<Result<Vec<_>, _>>()?;

  let scores: Vec<f32> = value
    .get("scores")
    .and_then(|v| v.as_array())
    .ok_or_else(|| bad_recording("帧缺少 scores"))?
    .iter()
    .map(|v| v.as_f64().map(|v| v as f32))
    .collect::<Option<Vec<_>>>()
    .ok_or_else(|| bad_recording("置信度应为数字"))?;

  let classes: Vec<u32> = value
    .get("classes")
    .and_then(|v| v.as_array())
    .ok_or_else(|| bad_recording("帧缺少 classes"))?
    .iter()
    .map(|v| v.as_u64().map(|v| v as u32))
    .collect::<Option<Vec<_>>>()
    .ok_or_else(|| bad_recording("类别应为非负整数"))?;

  if boxes.len() != scores.len() || scores.len() != classes.len() {
    return Err(bad_recording("boxes/scores/classes 长度不一致"));
  }
  if scores.len() > candidates {
    return Err(bad_recording("候选数量超过 candidates 上限"));
  }

  Ok(ReplayFrame {
    boxes,
    scores,
    classes,
  })
}

impl Engine for ReplayEngine {
  type Error = ReplayEngineError;

  fn infer(&self, input: InputTensor) -> Result<RawOutput, Self::Error> {
    let scope = input.scope();
    // 输入张量只属于这一次推理调用，取得作用域后立即释放
    drop(input);

    let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.frames.len();
    let frame = &self.frames[index];
    let n = self.candidates;

    // 填充到固定的 N 个候选槽位，空槽位置信度为 0
    let mut boxes = Vec::with_capacity(n * 4);
    let mut scores = Vec::with_capacity(n);
    let mut classes = Vec::with_capacity(n);
    for i in 0..n {
      if i < frame.scores.len() {
        boxes.extend_from_slice(&frame.boxes[i]);
        scores.push(frame.scores[i]);
        classes.push(frame.classes[i]);
      } else {
        boxes.extend_from_slice(&[0.0, 0.0, 0.0, 0.0]);
        scores.push(0.0);
        classes.push(0);
      }
    }

    let raw = RawOutput::new(
      Tensor::new(&scope, &[1, n, 4], boxes)?,
      Tensor::new(&scope, &[1, n], scores)?,
      Tensor::new(&scope, &[n], classes)?,
    )?;

    Ok(raw)
  }
}
