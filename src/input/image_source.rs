// 该文件是 Qinghong （青红） 项目的一部分。
// src/input/image_source.rs - 图片回放输入源
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

use std::time::Instant;

use anyhow::{Context, Result};
use image::{ImageReader, RgbImage};

use super::{InputSource, InputSourceType};
use crate::frame::Frame;

/// 把一张静态图片当作持续的实时源回放，每次取帧返回同一画面，
/// 帧索引与时间戳正常推进。用于没有摄像头的演示与测试。
pub struct ImageSource {
  image: RgbImage,
  width: u32,
  height: u32,
  frame_index: u64,
  start_time: Instant,
}

impl ImageSource {
  pub fn new(path: &str) -> Result<Self> {
    let image = ImageReader::open(path)
      .with_context(|| format!("无法打开图片文件: {}", path))?
      .decode()
      .with_context(|| format!("无法解码图片文件: {}", path))?
      .to_rgb8();

    let width = image.width();
    let height = image.height();

    Ok(Self {
      image,
      width,
      height,
      frame_index: 0,
      start_time: Instant::now(),
    })
  }
}

impl Iterator for ImageSource {
  type Item = Result<Frame>;

  fn next(&mut self) -> Option<Self::Item> {
    let frame = Frame::new(
      self.image.clone(),
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Some(Ok(frame))
  }
}

impl InputSource for ImageSource {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::Image
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    None
  }
}
