// 该文件是 Qinghong （青红） 项目的一部分。
// src/output/overlay.rs - 检测结果叠加渲染
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::{decode::Detection, registry::ClassRegistry};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_CHIP_PADDING: u32 = 4;
const LABEL_TEXT_OFFSET: i32 = 2;
const LINE_WIDTH: i32 = 4;
const TEXT_COLOR: [u8; 3] = [0, 0, 0];

/// 类别表中查不到样式时的边框颜色
pub const FALLBACK_COLOR: [u8; 3] = [0xff, 0x99, 0x00];

/// 叠加渲染器。在与帧同尺寸的画布上绘制检测框与标签，
/// 样式按标签（类别）从类别表取色。
///
/// 绘制分两遍：先画所有边框与标签底色，再画所有标签文字，
/// 保证文字不会被后画的底色遮住。渲染器不保留对检测列表的引用。
pub struct Overlay {
  font: FontArc,
  font_scale: PxScale,
  line_width: i32,
  char_width: f32,
}

impl Default for Overlay {
  fn default() -> Self {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data).expect("无法加载内嵌字体");

    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      line_width: LINE_WIDTH,
      char_width: LABEL_CHAR_WIDTH,
    }
  }
}

impl Overlay {
  pub fn new() -> Self {
    Self::default()
  }

  /// 在画布上绘制检测结果。画布须由调用者在本周期内从当前帧
  /// 重新生成（整帧重绘，无脏矩形优化）。
  pub fn render(&self, canvas: &mut RgbImage, detections: &[Detection], registry: &ClassRegistry) {
    // 第一遍：所有边框与标签底色
    for det in detections {
      let color = self.class_color(registry, det);
      self.stroke_bbox(canvas, det, color);
      self.fill_label_chip(canvas, det, color);
    }

    // 第二遍：所有标签文字
    for det in detections {
      let x = det.bbox.x.round() as i32;
      let y = det.bbox.y.round() as i32;
      draw_text_mut(
        canvas,
        Rgb(TEXT_COLOR),
        x + LABEL_TEXT_OFFSET,
        y + LABEL_TEXT_OFFSET,
        self.font_scale,
        &self.font,
        &label_text(det),
      );
    }
  }

  fn class_color(&self, registry: &ClassRegistry, det: &Detection) -> Rgb<u8> {
    Rgb(
      registry
        .get(det.class_id)
        .map(|entry| entry.color)
        .unwrap_or(FALLBACK_COLOR),
    )
  }

  fn stroke_bbox(&self, canvas: &mut RgbImage, det: &Detection, color: Rgb<u8>) {
    let x = det.bbox.x.round() as i32;
    let y = det.bbox.y.round() as i32;
    let width = det.bbox.width.round() as i64;
    let height = det.bbox.height.round() as i64;

    for inset in 0..self.line_width {
      let w = width - 2 * inset as i64;
      let h = height - 2 * inset as i64;
      if w <= 0 || h <= 0 {
        break;
      }
      let rect = Rect::at(x + inset, y + inset).of_size(w as u32, h as u32);
      draw_hollow_rect_mut(canvas, rect, color);
    }
  }

  fn fill_label_chip(&self, canvas: &mut RgbImage, det: &Detection, color: Rgb<u8>) {
    let x = det.bbox.x.round() as i32;
    let y = det.bbox.y.round() as i32;

    let text = label_text(det);
    let chip_width = (text.len() as f32 * self.char_width) as u32 + LABEL_CHIP_PADDING;
    let chip_height = LABEL_FONT_SIZE as u32 + LABEL_CHIP_PADDING;

    let rect = Rect::at(x, y).of_size(chip_width, chip_height);
    draw_filled_rect_mut(canvas, rect, color);
  }
}

/// 标签文字内容：`<名称> <置信度百分比，两位小数>%`
fn label_text(det: &Detection) -> String {
  format!("{} {:.2}%", det.label, det.score * 100.0)
}
