// 该文件是 Qinghong （青红） 项目的一部分。
// src/task.rs - 检测循环
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  decode::{self, DecodeError},
  engine::Engine,
  input::InputSource,
  output::OutputWriter,
  preprocess,
  registry::ClassRegistry,
  tensor::TensorScope,
};

/// 默认置信度阈值
pub const DEFAULT_THRESHOLD: f32 = 0.01;

/// 连续失败达到该次数后循环升级为停止
pub const MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// 循环状态机：初始化完成前为 Idle，稳态为 Running，
/// Stopped 为终态（初始化失败、取消或不可恢复的错误）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
  Idle,
  Running,
  Stopped,
}

/// 取消令牌，每个周期开始时检查一次。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  cancelled: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}

/// 并行执行两个初始化操作，任一失败则整体失败。
/// 失败语义：两个结果都取回后，按参数顺序报告第一个失败，丢弃另一个结果。
pub fn join_setup<A, B, FA, FB>(setup_a: FA, setup_b: FB) -> Result<(A, B)>
where
  A: Send,
  B: Send,
  FA: FnOnce() -> Result<A> + Send,
  FB: FnOnce() -> Result<B> + Send,
{
  thread::scope(|scope| {
    let handle_b = scope.spawn(setup_b);
    let result_a = setup_a();
    let result_b = handle_b.join().map_err(|_| anyhow!("初始化线程崩溃"))?;

    match (result_a, result_b) {
      (Ok(a), Ok(b)) => Ok((a, b)),
      (Err(e), _) => Err(e),
      (_, Err(e)) => Err(e),
    }
  })
}

/// 帧间定时器：把每个周期的剩余时间睡掉，使循环贴合源帧率。
pub struct TickPacer {
  interval: Option<Duration>,
  deadline: Option<Instant>,
}

impl TickPacer {
  pub fn new(fps: Option<f64>) -> Self {
    Self {
      interval: fps.filter(|f| *f > 0.0).map(|f| Duration::from_secs_f64(1.0 / f)),
      deadline: None,
    }
  }

  pub fn pace(&mut self) {
    let Some(interval) = self.interval else {
      return;
    };

    let now = Instant::now();
    if let Some(deadline) = self.deadline
      && deadline > now
    {
      thread::sleep(deadline - now);
    }
    self.deadline = Some(self.deadline.unwrap_or(now).max(now) + interval);
  }
}

/// 循环持有的全部协作对象。显式传递，循环之外不存在共享的全局状态。
pub struct LoopContext<E: Engine> {
  pub source: Box<dyn InputSource>,
  pub engine: E,
  pub output: Box<dyn OutputWriter>,
  pub registry: ClassRegistry,
  pub threshold: f32,
  pub scope: TensorScope,
}

/// 单个周期的结果
#[derive(Debug)]
pub enum TickOutcome {
  /// 本帧已渲染，附检测数量
  Rendered { detections: usize },
  /// 周期开始时收到取消请求
  Cancelled,
  /// 输入源已结束
  SourceExhausted,
}

#[derive(Error, Debug)]
pub enum TickError {
  #[error("取帧失败: {0}")]
  Frame(anyhow::Error),
  #[error("推理失败: {0}")]
  Inference(anyhow::Error),
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("输出失败: {0}")]
  Output(anyhow::Error),
}

impl TickError {
  /// 推理与解码失败跳过本帧继续；取帧与输出失败停止循环。
  fn is_recoverable(&self) -> bool {
    matches!(self, TickError::Inference(_) | TickError::Decode(_))
  }
}

/// 循环结束后的统计
#[derive(Debug)]
pub struct LoopReport {
  pub frames: u64,
  pub detections: u64,
}

/// 检测循环：逐周期执行 取帧 → 预处理 → 推理 → 解码 → 渲染 → 释放，
/// 然后按帧率进入下一周期。单线程协作式调度，同一时刻只有一次推理在途。
pub struct DetectionLoop<E: Engine> {
  context: LoopContext<E>,
  state: LoopState,
  cancel: CancelToken,
  pacer: TickPacer,
  frame_limit: Option<u64>,
  ticks: u64,
  total_detections: u64,
  consecutive_failures: u32,
}

impl<E: Engine> DetectionLoop<E> {
  /// 等待输入源与推理引擎都就绪后进入 Running。
  /// 任一初始化失败即为终态：错误上报一次，循环不会建立。
  pub fn start<FS, FE>(
    source_setup: FS,
    engine_setup: FE,
    output: Box<dyn OutputWriter>,
    registry: ClassRegistry,
    threshold: f32,
    cancel: CancelToken,
  ) -> Result<Self>
  where
    E: Send,
    FS: FnOnce() -> Result<Box<dyn InputSource>> + Send,
    FE: FnOnce() -> Result<E> + Send,
  {
    info!("等待输入源与推理引擎就绪...");
    let (source, engine) = join_setup(source_setup, engine_setup)?;
    info!("初始化完成: 输入 {}x{}", source.width(), source.height());

    let context = LoopContext {
      source,
      engine,
      output,
      registry,
      threshold,
      scope: TensorScope::new(),
    };

    Ok(Self::from_context(context, cancel))
  }

  /// 从已就绪的上下文建立循环，初始为 Idle，`run` 时进入 Running
  pub fn from_context(context: LoopContext<E>, cancel: CancelToken) -> Self {
    let pacer = TickPacer::new(context.source.fps());
    Self {
      context,
      state: LoopState::Idle,
      cancel,
      pacer,
      frame_limit: None,
      ticks: 0,
      total_detections: 0,
      consecutive_failures: 0,
    }
  }

  /// 最大处理帧数，0 表示无限制
  pub fn with_frame_limit(mut self, limit: u64) -> Self {
    self.frame_limit = if limit > 0 { Some(limit) } else { None };
    self
  }

  /// 覆盖输入源上报的帧率来控制循环节奏
  pub fn with_fps(mut self, fps: Option<f64>) -> Self {
    if fps.is_some() {
      self.pacer = TickPacer::new(fps);
    }
    self
  }

  pub fn state(&self) -> LoopState {
    self.state
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  /// 执行一个完整周期。本周期内分配的张量在函数返回时已全部释放：
  /// 输入张量由推理调用按值消费，输出张量由解码按值消费，
  /// 错误路径上二者同样随所有权结束而释放。
  pub fn tick(&mut self) -> Result<TickOutcome, TickError> {
    if self.cancel.is_cancelled() {
      return Ok(TickOutcome::Cancelled);
    }

    let frame = match self.context.source.next() {
      None => return Ok(TickOutcome::SourceExhausted),
      Some(Err(e)) => return Err(TickError::Frame(e)),
      Some(Ok(frame)) => frame,
    };

    let started = Instant::now();

    let input = preprocess::prepare(&frame, &self.context.scope);
    let raw = self
      .context
      .engine
      .infer(input)
      .map_err(|e| TickError::Inference(anyhow::Error::new(e)))?;

    let detections = decode::decode(
      raw,
      self.context.threshold,
      &self.context.registry,
      frame.width(),
      frame.height(),
    )?;

    self
      .context
      .output
      .write_frame(&frame, &detections)
      .map_err(TickError::Output)?;

    debug!(
      "帧 {} 处理完成: {} 个检测, 耗时 {:.2?}",
      frame.index,
      detections.len(),
      started.elapsed()
    );

    Ok(TickOutcome::Rendered {
      detections: detections.len(),
    })
  }

  /// 持续运行直到取消、输入结束、达到帧数上限或不可恢复的错误。
  /// Stopped 是终态，停止后的循环不能再次运行。
  pub fn run(&mut self) -> Result<LoopReport> {
    if self.state == LoopState::Stopped {
      return Err(anyhow!("循环已停止，无法再次运行"));
    }
    self.state = LoopState::Running;

    info!("检测循环开始");
    loop {
      match self.tick() {
        Ok(TickOutcome::Rendered { detections }) => {
          self.ticks += 1;
          self.total_detections += detections as u64;
          self.consecutive_failures = 0;

          // 每个周期结束后本周期的张量必须已全部释放
          let live = self.context.scope.live_tensors();
          if live != 0 {
            warn!("周期结束后仍有 {} 个张量未释放", live);
          }

          if let Some(limit) = self.frame_limit
            && self.ticks >= limit
          {
            info!("达到指定帧数 {}, 退出循环", limit);
            break;
          }

          self.pacer.pace();
        }
        Ok(TickOutcome::Cancelled) => {
          info!("收到取消请求，退出循环");
          break;
        }
        Ok(TickOutcome::SourceExhausted) => {
          info!("输入源结束，退出循环");
          break;
        }
        Err(e) if e.is_recoverable() => {
          self.consecutive_failures += 1;
          warn!("跳过本帧（连续第 {} 次失败）: {}", self.consecutive_failures, e);

          if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            self.state = LoopState::Stopped;
            let _ = self.context.output.finish();
            return Err(anyhow::Error::new(e).context(format!(
              "连续失败 {} 次，停止循环",
              MAX_CONSECUTIVE_FAILURES
            )));
          }

          self.pacer.pace();
        }
        Err(e) => {
          self.state = LoopState::Stopped;
          let _ = self.context.output.finish();
          return Err(anyhow::Error::new(e).context("检测循环停止"));
        }
      }
    }

    self.state = LoopState::Stopped;
    self.context.output.finish()?;

    Ok(LoopReport {
      frames: self.ticks,
      detections: self.total_detections,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    decode::Detection,
    frame::Frame,
    input::InputSourceType,
    tensor::{InputTensor, RawOutput, Tensor},
  };
  use image::RgbImage;
  use std::sync::Mutex;

  struct StubSource {
    frames_left: usize,
    width: u32,
    height: u32,
    index: u64,
  }

  impl StubSource {
    fn new(frames: usize) -> Self {
      Self {
        frames_left: frames,
        width: 16,
        height: 16,
        index: 0,
      }
    }
  }

  impl Iterator for StubSource {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
      if self.frames_left == 0 {
        return None;
      }
      self.frames_left -= 1;
      let frame = Frame::new(RgbImage::new(self.width, self.height), self.index, 0);
      self.index += 1;
      Some(Ok(frame))
    }
  }

  impl InputSource for StubSource {
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

  #[derive(Error, Debug)]
  enum StubEngineError {
    #[error("制造的推理失败")]
    Forced,
  }

  /// 每帧固定输出一个红苹果候选；`fail_every` 大于 0 时周期性失败
  struct StubEngine {
    class_id: u32,
    fail_every: usize,
    calls: std::sync::atomic::AtomicUsize,
  }

  impl StubEngine {
    fn detecting(class_id: u32) -> Self {
      Self {
        class_id,
        fail_every: 0,
        calls: std::sync::atomic::AtomicUsize::new(0),
      }
    }

    fn always_failing() -> Self {
      Self {
        class_id: 1,
        fail_every: 1,
        calls: std::sync::atomic::AtomicUsize::new(0),
      }
    }

    fn failing_every(n: usize) -> Self {
      Self {
        class_id: 1,
        fail_every: n,
        calls: std::sync::atomic::AtomicUsize::new(0),
      }
    }
  }

  impl Engine for StubEngine {
    type Error = StubEngineError;

    fn infer(&self, input: InputTensor) -> Result<RawOutput, Self::Error> {
      let scope = input.scope();
      drop(input);

      let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
      if self.fail_every > 0 && call % self.fail_every == 0 {
        return Err(StubEngineError::Forced);
      }

      let raw = RawOutput::new(
        Tensor::new(&scope, &[1, 1, 4], vec![0.1, 0.1, 0.5, 0.5]).unwrap(),
        Tensor::new(&scope, &[1, 1], vec![0.8]).unwrap(),
        Tensor::new(&scope, &[1], vec![self.class_id]).unwrap(),
      )
      .unwrap();
      Ok(raw)
    }
  }

  #[derive(Default)]
  struct Counters {
    frames: usize,
    detections: usize,
  }

  struct CollectOutput {
    counters: Arc<Mutex<Counters>>,
  }

  impl OutputWriter for CollectOutput {
    fn write_frame(&mut self, _frame: &Frame, detections: &[Detection]) -> Result<()> {
      let mut counters = self.counters.lock().unwrap();
      counters.frames += 1;
      counters.detections += detections.len();
      Ok(())
    }

    fn finish(&mut self) -> Result<()> {
      Ok(())
    }
  }

  fn collect_output() -> (Box<dyn OutputWriter>, Arc<Mutex<Counters>>) {
    let counters = Arc::new(Mutex::new(Counters::default()));
    (
      Box::new(CollectOutput {
        counters: counters.clone(),
      }),
      counters,
    )
  }

  fn test_loop(
    frames: usize,
    engine: StubEngine,
  ) -> (DetectionLoop<StubEngine>, Arc<Mutex<Counters>>) {
    let (output, counters) = collect_output();
    let context = LoopContext {
      source: Box::new(StubSource::new(frames)),
      engine,
      output,
      registry: ClassRegistry::red_green(),
      threshold: DEFAULT_THRESHOLD,
      scope: TensorScope::new(),
    };
    (DetectionLoop::from_context(context, CancelToken::new()), counters)
  }

  #[test]
  fn join_setup_returns_both_values() {
    let (a, b) = join_setup(|| Ok(1u32), || Ok("ready")).unwrap();
    assert_eq!(a, 1);
    assert_eq!(b, "ready");
  }

  #[test]
  fn join_setup_fails_fast_on_either_failure() {
    let first: Result<(u32, u32)> =
      join_setup(|| Err(anyhow!("摄像头初始化失败")), || Ok(2u32));
    assert!(first.unwrap_err().to_string().contains("摄像头"));

    let second: Result<(u32, u32)> =
      join_setup(|| Ok(1u32), || Err(anyhow!("引擎初始化失败")));
    assert!(second.unwrap_err().to_string().contains("引擎"));
  }

  #[test]
  fn state_machine_goes_idle_running_stopped() {
    let (looper, _counters) = test_loop(2, StubEngine::detecting(1));
    let mut looper = looper;
    assert_eq!(looper.state(), LoopState::Idle);

    looper.run().unwrap();
    assert_eq!(looper.state(), LoopState::Stopped);

    // Stopped 为终态
    assert!(looper.run().is_err());
  }

  #[test]
  fn runs_until_frame_limit() {
    let (looper, counters) = test_loop(10, StubEngine::detecting(1));
    let mut looper = looper.with_frame_limit(3);

    let report = looper.run().unwrap();
    assert_eq!(report.frames, 3);
    assert_eq!(report.detections, 3);
    assert_eq!(looper.state(), LoopState::Stopped);
    assert_eq!(counters.lock().unwrap().frames, 3);
    assert_eq!(looper.context.scope.live_tensors(), 0);
  }

  #[test]
  fn runs_until_source_exhausted() {
    let (mut looper, counters) = test_loop(4, StubEngine::detecting(2));

    let report = looper.run().unwrap();
    assert_eq!(report.frames, 4);
    assert_eq!(counters.lock().unwrap().detections, 4);
  }

  #[test]
  fn cancellation_is_checked_at_tick_start() {
    let (mut looper, counters) = test_loop(10, StubEngine::detecting(1));
    looper.cancel_token().cancel();

    let report = looper.run().unwrap();
    assert_eq!(report.frames, 0);
    assert_eq!(looper.state(), LoopState::Stopped);
    assert_eq!(counters.lock().unwrap().frames, 0);
  }

  #[test]
  fn consecutive_inference_failures_escalate_to_stop() {
    let (mut looper, counters) = test_loop(1000, StubEngine::always_failing());

    let result = looper.run();
    assert!(result.is_err());
    assert_eq!(looper.state(), LoopState::Stopped);
    assert_eq!(counters.lock().unwrap().frames, 0);
    // 失败路径同样不得泄漏张量
    assert_eq!(looper.context.scope.live_tensors(), 0);
  }

  #[test]
  fn intermittent_failures_are_skipped() {
    // 每第 3 次调用失败一次，其余正常
    let (looper, counters) = test_loop(1000, StubEngine::failing_every(3));
    let mut looper = looper.with_frame_limit(4);

    let report = looper.run().unwrap();
    assert_eq!(report.frames, 4);
    assert_eq!(counters.lock().unwrap().frames, 4);
  }

  #[test]
  fn unknown_class_id_counts_as_tick_failure() {
    let (mut looper, counters) = test_loop(1000, StubEngine::detecting(99));

    let result = looper.run();
    assert!(result.is_err());
    assert_eq!(counters.lock().unwrap().frames, 0);
    assert_eq!(looper.context.scope.live_tensors(), 0);
  }

  #[test]
  fn tensors_do_not_accumulate_across_ticks() {
    let (looper, _counters) = test_loop(1000, StubEngine::detecting(1));
    let mut looper = looper.with_frame_limit(50);

    looper.run().unwrap();
    assert_eq!(looper.context.scope.live_tensors(), 0);
  }
}
