// 该文件是 Qinghong （青红） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use qinghong::task::DEFAULT_THRESHOLD;

/// Qinghong 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理引擎 URL
  /// 支持方案:
  /// - replay:///path/to/recording.json 回放录制的推理输出
  #[arg(long, value_name = "URL")]
  pub engine: Url,

  /// 输入来源 URL
  /// 支持方案:
  /// - image:///path/to/picture.png 循环回放单张图片
  /// - v4l2:///dev/video0?width=640&height=480 V4L2 摄像头
  #[arg(long, value_name = "URL")]
  pub input: Url,

  /// 输出 URL
  /// 支持方案:
  /// - image:///path/to/preview.png 每帧覆盖的实时预览
  /// - folder:///path/to/records?always 按日期目录逐帧记录
  #[arg(long, value_name = "URL")]
  pub output: Url,

  /// 置信度阈值 (0.0 - 1.0)，严格大于该值的候选才会保留
  #[arg(long, default_value_t = DEFAULT_THRESHOLD, value_name = "THRESHOLD")]
  pub threshold: f32,

  /// 类别表 JSON 文件，缺省使用内建的红/绿苹果类别表
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub frame_number: u64,

  /// 覆盖输入源上报的帧率（每秒帧数）
  #[arg(long, value_name = "FPS")]
  pub fps: Option<f64>,
}
