// 该文件是 Qinghong （青红） 项目的一部分。
// src/output/mod.rs - 输出模块
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

mod image_output;
pub mod overlay;
mod record;

use anyhow::{Result, bail};
use url::Url;

use crate::{decode::Detection, frame::Frame, registry::ClassRegistry};

pub use image_output::ImageOutput;
pub use overlay::Overlay;
pub use record::DirectoryRecordOutput;

/// 输出写入器。每个周期接收当前帧与该帧的检测列表，
/// 不得跨周期保留对检测列表的引用。
pub trait OutputWriter {
  /// 写入一帧
  fn write_frame(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()>;

  /// 完成写入
  fn finish(&mut self) -> Result<()>;
}

/// 按 URL 方案创建输出写入器
/// - `image:///path/to/preview.png` 每帧覆盖同一图片（实时预览）
/// - `folder:///path/to/records?always` 按日期目录逐帧记录
pub fn create_output_writer(url: &Url, registry: ClassRegistry) -> Result<Box<dyn OutputWriter>> {
  match url.scheme() {
    "image" => Ok(Box::new(ImageOutput::new(url.path(), registry))),
    "folder" => {
      let always = url.query_pairs().any(|(key, _)| key == "always");
      Ok(Box::new(DirectoryRecordOutput::new(
        url.path(),
        registry,
        always,
      )))
    }
    scheme => bail!("不支持的输出方案: {}", scheme),
  }
}
