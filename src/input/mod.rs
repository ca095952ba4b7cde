// 该文件是 Qinghong （青红） 项目的一部分。
// src/input/mod.rs - 输入源模块
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

mod image_source;
#[cfg(feature = "v4l2_input")]
mod v4l2_source;

use anyhow::{Result, bail};
use url::Url;

use crate::frame::Frame;

pub use image_source::ImageSource;
#[cfg(feature = "v4l2_input")]
pub use v4l2_source::V4l2Source;

/// 输入源类型
pub enum InputSourceType {
  /// 图片回放
  Image,
  /// V4L2 摄像头
  V4l2,
}

/// 实时输入源。权限协商与流的生命周期属于采集设备一侧，
/// 这里只按周期取用当前帧。
pub trait InputSource: Iterator<Item = Result<Frame>> + Send {
  /// 获取输入源类型
  fn source_type(&self) -> InputSourceType;

  /// 获取帧宽度
  fn width(&self) -> u32;

  /// 获取帧高度
  fn height(&self) -> u32;

  /// 获取帧率（如果适用）
  fn fps(&self) -> Option<f64>;
}

/// 按 URL 方案创建输入源
/// - `image:///path/to.jpg` 将静态图片作为持续的实时源回放
/// - `v4l2:///dev/video0?width=667&height=500` V4L2 摄像头
pub fn create_input_source(url: &Url) -> Result<Box<dyn InputSource>> {
  match url.scheme() {
    "image" => Ok(Box::new(ImageSource::new(url.path())?)),
    #[cfg(feature = "v4l2_input")]
    "v4l2" => Ok(Box::new(V4l2Source::from_url(url)?)),
    scheme => bail!("不支持的输入方案: {}", scheme),
  }
}
