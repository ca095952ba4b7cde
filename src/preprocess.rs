// 该文件是 Qinghong （青红） 项目的一部分。
// src/preprocess.rs - 帧预处理
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

use tracing::debug;

use crate::{
  frame::{Frame, RGB_CHANNELS},
  tensor::{InputTensor, TensorScope},
};

/// 将一帧画面转换为模型输入张量，形状 [1, H, W, 3]。
///
/// 像素值按原始整数送入模型，不做归一化、不减均值、不缩放尺寸：
/// 张量空间尺寸与帧尺寸严格一致，若模型要求固定分辨率由引擎侧负责。
/// 分配的张量由调用者负责在推理调用结束后释放。
pub fn prepare(frame: &Frame, scope: &TensorScope) -> InputTensor {
  let width = frame.width() as usize;
  let height = frame.height() as usize;

  let mut data = Vec::with_capacity(height * width * RGB_CHANNELS);
  for h in 0..height {
    for w in 0..width {
      let pixel = frame.image.get_pixel(w as u32, h as u32);
      for c in 0..RGB_CHANNELS {
        data.push(pixel[c] as i32);
      }
    }
  }

  debug!("帧 {} 预处理完成: [1, {}, {}, 3]", frame.index, height, width);

  InputTensor::new(scope, &[1, height, width, RGB_CHANNELS], data)
    .expect("输入张量长度与帧尺寸不匹配")
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn frame_2x2() -> Frame {
    let mut image = RgbImage::new(2, 2);
    image.put_pixel(0, 0, Rgb([1, 2, 3]));
    image.put_pixel(1, 0, Rgb([4, 5, 6]));
    image.put_pixel(0, 1, Rgb([7, 8, 9]));
    image.put_pixel(1, 1, Rgb([250, 251, 255]));
    Frame::new(image, 0, 0)
  }

  #[test]
  fn shape_is_batch_height_width_channels() {
    let scope = TensorScope::new();
    let tensor = prepare(&frame_2x2(), &scope);
    assert_eq!(tensor.shape(), &[1, 2, 2, 3]);
  }

  #[test]
  fn pixel_values_pass_through_without_normalization() {
    let scope = TensorScope::new();
    let tensor = prepare(&frame_2x2(), &scope);
    // NHWC 行优先，通道顺序不变
    assert_eq!(
      tensor.data(),
      &[1, 2, 3, 4, 5, 6, 7, 8, 9, 250, 251, 255]
    );
  }

  #[test]
  fn input_tensor_is_released_on_drop() {
    let scope = TensorScope::new();
    let tensor = prepare(&frame_2x2(), &scope);
    assert_eq!(scope.live_tensors(), 1);
    drop(tensor);
    assert_eq!(scope.live_tensors(), 0);
  }
}
