// 该文件是 Qinghong （青红） 项目的一部分。
// src/tensor.rs - 张量与逐帧资源管理
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

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;

/// 张量作用域。每个处理周期内分配的所有张量都挂在同一个作用域上，
/// 周期结束时计数必须回到零，否则说明发生了泄漏。
#[derive(Debug, Clone, Default)]
pub struct TensorScope {
  live: Arc<AtomicUsize>,
}

impl TensorScope {
  pub fn new() -> Self {
    Self::default()
  }

  /// 当前未释放的张量数量
  pub fn live_tensors(&self) -> usize {
    self.live.load(Ordering::SeqCst)
  }

  fn lease(&self) -> TensorLease {
    self.live.fetch_add(1, Ordering::SeqCst);
    TensorLease {
      live: self.live.clone(),
    }
  }
}

/// 张量在作用域上的占位，随张量一起析构，保证任何退出路径都会释放计数。
#[derive(Debug)]
struct TensorLease {
  live: Arc<AtomicUsize>,
}

impl Drop for TensorLease {
  fn drop(&mut self) {
    self.live.fetch_sub(1, Ordering::SeqCst);
  }
}

#[derive(Error, Debug)]
pub enum ShapeError {
  #[error("张量形状与数据长度不匹配: 形状 {shape:?}, 期望 {expected}, 实际 {actual}")]
  LengthMismatch {
    shape: Box<[usize]>,
    expected: usize,
    actual: usize,
  },
  #[error("输出张量形状不一致: {0}")]
  Inconsistent(String),
}

/// 固定形状的多维数组，数据与形状在构造后不再变化。
#[derive(Debug)]
pub struct Tensor<T> {
  data: Box<[T]>,
  shape: Box<[usize]>,
  lease: TensorLease,
}

impl<T> Tensor<T> {
  pub fn new(scope: &TensorScope, shape: &[usize], data: Vec<T>) -> Result<Self, ShapeError> {
    let expected: usize = shape.iter().product();
    if data.len() != expected {
      return Err(ShapeError::LengthMismatch {
        shape: shape.into(),
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      shape: shape.into(),
      lease: scope.lease(),
    })
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[T] {
    &self.data
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// 该张量所属的作用域。推理引擎由此在同一作用域内分配输出张量。
  pub fn scope(&self) -> TensorScope {
    TensorScope {
      live: self.lease.live.clone(),
    }
  }
}

/// 模型输入张量，形状 [1, H, W, 3]，整数像素值。
pub type InputTensor = Tensor<i32>;

/// 推理引擎的一次原始输出：
/// 检测框 [1, N, 4]（归一化 [y_min, x_min, y_max, x_max]）、
/// 置信度 [1, N]、类别 [N]。N 为模型固定的候选槽位数。
#[derive(Debug)]
pub struct RawOutput {
  pub boxes: Tensor<f32>,
  pub scores: Tensor<f32>,
  pub classes: Tensor<u32>,
}

impl RawOutput {
  pub fn new(
    boxes: Tensor<f32>,
    scores: Tensor<f32>,
    classes: Tensor<u32>,
  ) -> Result<Self, ShapeError> {
    let n = match scores.shape() {
      [1, n] => *n,
      other => {
        return Err(ShapeError::Inconsistent(format!(
          "置信度张量形状应为 [1, N], 实际 {:?}",
          other
        )));
      }
    };

    if boxes.shape() != [1, n, 4] {
      return Err(ShapeError::Inconsistent(format!(
        "检测框张量形状应为 [1, {}, 4], 实际 {:?}",
        n,
        boxes.shape()
      )));
    }

    if classes.shape() != [n] {
      return Err(ShapeError::Inconsistent(format!(
        "类别张量形状应为 [{}], 实际 {:?}",
        n,
        classes.shape()
      )));
    }

    Ok(Self {
      boxes,
      scores,
      classes,
    })
  }

  /// 模型每帧输出的候选槽位数 N
  pub fn candidates(&self) -> usize {
    self.scores.shape()[1]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scope_counts_live_tensors() {
    let scope = TensorScope::new();
    assert_eq!(scope.live_tensors(), 0);

    let a = Tensor::new(&scope, &[2, 2], vec![1i32, 2, 3, 4]).unwrap();
    let b = Tensor::new(&scope, &[3], vec![0.5f32, 0.1, 0.2]).unwrap();
    assert_eq!(scope.live_tensors(), 2);

    drop(a);
    assert_eq!(scope.live_tensors(), 1);
    drop(b);
    assert_eq!(scope.live_tensors(), 0);
  }

  #[test]
  fn tensor_scope_is_shared_through_input() {
    let scope = TensorScope::new();
    let tensor = Tensor::new(&scope, &[1], vec![7i32]).unwrap();

    let shared = tensor.scope();
    assert_eq!(shared.live_tensors(), 1);

    let other = Tensor::new(&shared, &[1], vec![8i32]).unwrap();
    assert_eq!(scope.live_tensors(), 2);

    drop(tensor);
    drop(other);
    assert_eq!(scope.live_tensors(), 0);
  }

  #[test]
  fn length_mismatch_is_rejected() {
    let scope = TensorScope::new();
    let result = Tensor::new(&scope, &[2, 3], vec![1i32, 2, 3]);
    assert!(matches!(result, Err(ShapeError::LengthMismatch { .. })));
    // 构造失败不得留下计数
    assert_eq!(scope.live_tensors(), 0);
  }

  fn tensor<T>(scope: &TensorScope, shape: &[usize], data: Vec<T>) -> Tensor<T> {
    Tensor::new(scope, shape, data).unwrap()
  }

  #[test]
  fn raw_output_validates_shapes() {
    let scope = TensorScope::new();

    let ok = RawOutput::new(
      tensor(&scope, &[1, 2, 4], vec![0.0f32; 8]),
      tensor(&scope, &[1, 2], vec![0.5f32, 0.6]),
      tensor(&scope, &[2], vec![1u32, 2]),
    );
    assert_eq!(ok.unwrap().candidates(), 2);

    let bad = RawOutput::new(
      tensor(&scope, &[1, 3, 4], vec![0.0f32; 12]),
      tensor(&scope, &[1, 2], vec![0.5f32, 0.6]),
      tensor(&scope, &[2], vec![1u32, 2]),
    );
    assert!(matches!(bad, Err(ShapeError::Inconsistent(_))));

    // 校验失败时张量随错误路径一起释放
    assert_eq!(scope.live_tensors(), 0);
  }
}
