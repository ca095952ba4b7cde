// 该文件是 Qinghong （青红） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use qinghong::{
  FromUrl,
  engine::ReplayEngine,
  input::create_input_source,
  output::create_output_writer,
  registry::ClassRegistry,
  task::{CancelToken, DetectionLoop},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("Qinghong 红绿苹果检测");
  info!("推理引擎: {}", args.engine);
  info!("输入来源: {}", args.input);
  info!("输出: {}", args.output);
  info!("置信度阈值: {}", args.threshold);

  let registry = match &args.labels {
    Some(path) => ClassRegistry::from_json_file(path)
      .with_context(|| format!("无法加载类别表: {}", path.display()))?,
    None => ClassRegistry::red_green(),
  };
  info!("类别表: {} 个类别", registry.len());

  let output = create_output_writer(&args.output, registry.clone())?;

  let cancel = CancelToken::new();
  {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      cancel.cancel();
    })?;
  }

  // 输入源与推理引擎并行初始化，任一失败则直接退出
  let input_url = args.input;
  let engine_url = args.engine;
  let mut task = DetectionLoop::start(
    move || create_input_source(&input_url),
    move || ReplayEngine::from_url(&engine_url).map_err(Into::into),
    output,
    registry,
    args.threshold,
    cancel,
  )?
  .with_frame_limit(args.frame_number)
  .with_fps(args.fps);

  let report = task.run()?;

  info!("处理完成!");
  info!("总帧数: {}", report.frames);
  info!("总检测数: {}", report.detections);

  Ok(())
}
