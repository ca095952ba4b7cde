// 该文件是 Qinghong （青红） 项目的一部分。
// src/output/record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use image::RgbImage;
use serde_json::json;
use tracing::info;

use super::{OutputWriter, overlay::Overlay};
use crate::{decode::Detection, frame::Frame, registry::ClassRegistry};

/// 按日期目录逐帧记录：每帧保存叠加渲染后的 PNG，
/// 并附带一个 JSON 文件记录检测明细。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  overlay: Overlay,
  registry: ClassRegistry,
  frame_counter: u16,
  /// 为真时空帧也记录
  always: bool,
  written: u64,
}

impl DirectoryRecordOutput {
  pub fn new(directory: &str, registry: ClassRegistry, always: bool) -> Self {
    Self {
      directory: PathBuf::from(directory),
      overlay: Overlay::new(),
      registry,
      frame_counter: 0,
      always,
      written: 0,
    }
  }

  fn next_frame_path(&mut self) -> Result<PathBuf> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)
        .with_context(|| format!("无法创建记录目录: {}", directory.display()))?;
    }

    self.frame_counter = self.frame_counter.wrapping_add(1);
    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_counter
    )))
  }
}

impl OutputWriter for DirectoryRecordOutput {
  fn write_frame(&mut self, frame: &Frame, detections: &[Detection]) -> Result<()> {
    if detections.is_empty() && !self.always {
      return Ok(());
    }

    let path = self.next_frame_path()?;

    let mut canvas = frame.image.clone();
    self.overlay.render(&mut canvas, detections, &self.registry);

    let record = json!({
      "frame": frame.index,
      "timestamp_ms": frame.timestamp_ms,
      "detections": detections
        .iter()
        .map(|det| {
          json!({
            "class_id": det.class_id,
            "label": det.label,
            "score": det.score,
            "bbox": [det.bbox.x, det.bbox.y, det.bbox.width, det.bbox.height],
          })
        })
        .collect::<Vec<_>>(),
    });
    write_record(&path, &canvas, &record)?;

    self.written += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<()> {
    info!("目录记录完成: 共写入 {} 帧", self.written);
    Ok(())
  }
}

/// 保存渲染图片与 JSON 明细。图片与明细成对出现：
/// 明细写入失败时删除已保存的图片。
fn write_record(path: &Path, canvas: &RgbImage, record: &serde_json::Value) -> Result<()> {
  let text = serde_json::to_string_pretty(record)?;

  canvas
    .save(path)
    .with_context(|| format!("无法保存记录图片: {}", path.display()))?;

  let sidecar = path.with_extension("json");
  if let Err(e) = std::fs::write(&sidecar, text) {
    std::fs::remove_file(path).ok();
    return Err(anyhow::Error::new(e).context(format!("无法写入记录明细: {}", sidecar.display())));
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::decode::BBox;
  use image::RgbImage;

  fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(name);
    std::fs::remove_dir_all(&dir).ok();
    dir
  }

  fn count_files(dir: &PathBuf, extension: &str) -> usize {
    let mut count = 0;
    let mut stack = vec![dir.clone()];
    while let Some(current) = stack.pop() {
      let Ok(entries) = std::fs::read_dir(&current) else {
        continue;
      };
      for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
          stack.push(path);
        } else if path.extension().map(|e| e == extension).unwrap_or(false) {
          count += 1;
        }
      }
    }
    count
  }

  #[test]
  fn skips_empty_frames_unless_always() {
    let dir = test_dir("qinghong-record-skip-test");
    let registry = ClassRegistry::red_green();
    let frame = Frame::from(RgbImage::new(32, 32));

    let mut writer = DirectoryRecordOutput::new(dir.to_str().unwrap(), registry.clone(), false);
    writer.write_frame(&frame, &[]).unwrap();
    assert_eq!(count_files(&dir, "png"), 0);

    let mut writer = DirectoryRecordOutput::new(dir.to_str().unwrap(), registry, true);
    writer.write_frame(&frame, &[]).unwrap();
    assert_eq!(count_files(&dir, "png"), 1);

    std::fs::remove_dir_all(&dir).ok();
  }

  #[test]
  fn failed_sidecar_write_removes_the_image() {
    let dir = test_dir("qinghong-record-orphan-test");
    std::fs::create_dir_all(&dir).unwrap();

    let path = dir.join("frame.png");
    // 占住明细路径，让明细写入必然失败
    std::fs::create_dir_all(path.with_extension("json")).unwrap();

    let canvas = RgbImage::new(8, 8);
    let result = write_record(&path, &canvas, &serde_json::json!({"detections": []}));

    assert!(result.is_err());
    assert!(!path.exists(), "明细写入失败后不应留下图片");

    std::fs::remove_dir_all(&dir).ok();
  }

  #[test]
  fn writes_png_and_json_per_frame() {
    let dir = test_dir("qinghong-record-write-test");
    let registry = ClassRegistry::red_green();
    let frame = Frame::from(RgbImage::new(32, 32));
    let detections = vec![Detection {
      class_id: 1,
      label: "red".to_string(),
      score: 0.9,
      bbox: BBox { x: 1.0, y: 2.0, width: 10.0, height: 12.0 },
    }];

    let mut writer = DirectoryRecordOutput::new(dir.to_str().unwrap(), registry, false);
    writer.write_frame(&frame, &detections).unwrap();
    writer.finish().unwrap();

    assert_eq!(count_files(&dir, "png"), 1);
    assert_eq!(count_files(&dir, "json"), 1);

    std::fs::remove_dir_all(&dir).ok();
  }
}
