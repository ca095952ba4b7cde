// 该文件是 Qinghong （青红） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
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

use std::sync::mpsc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use image::RgbImage;
use tracing::{debug, info};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{InputSource, InputSourceType};
use crate::frame::Frame;

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const CAPTURE_BUFFERS: u32 = 4;

/// V4L2 摄像头输入源。
///
/// 捕获流与设备由独立的采集线程持有，帧通过有界通道交付；
/// 接收端被丢弃后采集线程随之退出，流随设备一起关闭。
pub struct V4l2Source {
  receiver: mpsc::Receiver<Result<Frame>>,
  width: u32,
  height: u32,
}

impl V4l2Source {
  /// 从 URL 创建，例如 `v4l2:///dev/video0?width=667&height=500`
  pub fn from_url(url: &Url) -> Result<Self> {
    let device_path = if url.path().is_empty() {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };

    let mut want_width = DEFAULT_WIDTH;
    let mut want_height = DEFAULT_HEIGHT;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "width" => want_width = value.parse().unwrap_or(DEFAULT_WIDTH),
        "height" => want_height = value.parse().unwrap_or(DEFAULT_HEIGHT),
        _ => {}
      }
    }

    Self::open(&device_path, want_width, want_height)
  }

  pub fn open(device_path: &str, want_width: u32, want_height: u32) -> Result<Self> {
    let device = Device::with_path(device_path)
      .with_context(|| format!("无法打开设备: {}", device_path))?;

    let mut format = device.format()?;
    format.width = want_width;
    format.height = want_height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;

    let width = format.width;
    let height = format.height;
    info!("摄像头 {} 已打开: {}x{} YUYV", device_path, width, height);

    let (sender, receiver) = mpsc::sync_channel(2);
    std::thread::Builder::new()
      .name("v4l2-capture".to_string())
      .spawn(move || capture_loop(device, width, height, sender))
      .context("无法启动采集线程")?;

    Ok(Self {
      receiver,
      width,
      height,
    })
  }
}

fn capture_loop(
  device: Device,
  width: u32,
  height: u32,
  sender: mpsc::SyncSender<Result<Frame>>,
) {
  let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, CAPTURE_BUFFERS) {
    Ok(stream) => stream,
    Err(e) => {
      let _ = sender.send(Err(anyhow!("无法创建捕获流: {}", e)));
      return;
    }
  };

  let start_time = Instant::now();
  let mut frame_index = 0u64;

  loop {
    let item = match stream.next() {
      Ok((buffer, _meta)) => {
        let rgb = yuyv_to_rgb(buffer);
        match RgbImage::from_raw(width, height, rgb) {
          Some(image) => Ok(Frame::new(
            image,
            frame_index,
            start_time.elapsed().as_millis() as u64,
          )),
          None => Err(anyhow!("捕获缓冲区大小与 {}x{} 不匹配", width, height)),
        }
      }
      Err(e) => Err(anyhow!("无法捕获帧: {}", e)),
    };

    frame_index += 1;

    if sender.send(item).is_err() {
      // 接收端已关闭，结束采集
      debug!("采集线程退出");
      break;
    }
  }
}

/// 将 YUYV 格式转换为 RGB24
fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
  let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

impl Iterator for V4l2Source {
  type Item = Result<Frame>;

  fn next(&mut self) -> Option<Self::Item> {
    self.receiver.recv().ok()
  }
}

impl InputSource for V4l2Source {
  fn source_type(&self) -> InputSourceType {
    InputSourceType::V4l2
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    Some(30.0)
  }
}
