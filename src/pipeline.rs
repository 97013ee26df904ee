// 该文件是 Kashi （卡识） 项目的一部分。
// src/pipeline.rs - 检测流水线与生命周期
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

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{ConfigError, DetectorConfig},
  input::{FrameAcquirer, FrameSource, FrameUnavailable},
  lifecycle::LifecycleHandle,
  model::{BoxedError, Device, EngineLoader, InferenceEngine, InferenceInvoker, select_device},
  output::DetectionSink,
  scheduler::{AdaptiveScheduler, TickDecision},
  score::{Detection, DetectionScorer, PositionEstimator, ScreenSpace, Vec3},
  tensor::Preprocessor,
};

#[derive(Error, Debug)]
pub enum InitializationError {
  #[error("推理引擎加载失败 ({device}): {source}")]
  EngineLoad {
    device: Device,
    #[source]
    source: BoxedError,
  },
}

/// 周期在哪个检查点被放弃
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
  Acquire,
  Preprocess,
  Inference,
  Publish,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
  Detected(Detection),
  NotDetected,
  FrameUnavailable(FrameUnavailable),
  InferenceFailed,
  /// 周期中途被挂起或销毁，结果被丢弃
  Abandoned(CycleStage),
}

impl CycleOutcome {
  /// 完整走完评分与发布的周期才计入耗时统计
  pub fn is_completed(&self) -> bool {
    matches!(self, CycleOutcome::Detected(_) | CycleOutcome::NotDetected)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
  Skipped,
  Busy,
  Suspended,
  Ran {
    outcome: CycleOutcome,
    latency: Duration,
  },
  TornDown,
  Disabled,
}

struct Resources<S, E> {
  acquirer: FrameAcquirer<S>,
  preprocessor: Preprocessor,
  invoker: InferenceInvoker<E>,
}

/// 帧获取、预处理、推理、评分、发布的完整流水线
///
/// 原生资源（帧缓冲、推理引擎）放在 `resources` 中，`teardown` 取出后逐个释放，
/// 之后的任何调用都看不到它们，因此重复释放不会发生。`Drop` 也会走同一路径。
pub struct Pipeline<S: FrameSource, E: InferenceEngine, K: DetectionSink> {
  config: DetectorConfig,
  scheduler: AdaptiveScheduler,
  scorer: DetectionScorer,
  estimator: Box<dyn PositionEstimator + Send>,
  lifecycle: LifecycleHandle,
  resources: Option<Resources<S, E>>,
  sink: K,
  device: Device,
  active: bool,
  cycles: u64,
}

impl<S: FrameSource, E: InferenceEngine, K: DetectionSink> Pipeline<S, E, K> {
  pub fn new<L>(
    config: DetectorConfig,
    source: S,
    loader: &L,
    sink: K,
  ) -> Result<Self, InitializationError>
  where
    L: EngineLoader<Engine = E>,
  {
    let caps = loader.capabilities();
    let device = select_device(config.prefer_gpu(), caps);
    debug!(
      "设备能力: gpu={}, cpu={}, 选择 {}",
      caps.supports_gpu, caps.cpu_count, device
    );

    let engine = loader
      .load(device)
      .map_err(|e| InitializationError::EngineLoad {
        device,
        source: Box::new(e),
      })?;

    let resources = Resources {
      acquirer: FrameAcquirer::new(source, config.width(), config.height()),
      preprocessor: Preprocessor::new(config.width(), config.height()),
      invoker: InferenceInvoker::new(engine, device),
    };

    let mut pipeline = Self {
      scheduler: AdaptiveScheduler::new(&config),
      scorer: DetectionScorer::new(config.scan_cap()),
      estimator: Box::new(ScreenSpace::default()),
      lifecycle: LifecycleHandle::new(),
      resources: Some(resources),
      sink,
      device,
      active: false,
      cycles: 0,
      config,
    };
    // 启动时先把 UI 置为隐藏
    pipeline.notify(false, None);

    info!(
      "检测器已初始化: 输入 {}x{}, 设备 {}, 阈值 {}, 初始间隔 {}",
      pipeline.config.width(),
      pipeline.config.height(),
      device,
      pipeline.config.confidence_threshold(),
      pipeline.scheduler.current_frame_skip_interval()
    );
    Ok(pipeline)
  }

  pub fn with_position_estimator(
    mut self,
    estimator: impl PositionEstimator + Send + 'static,
  ) -> Self {
    self.estimator = Box::new(estimator);
    self
  }

  /// 宿主每帧调用一次
  pub fn tick(&mut self) -> TickOutcome {
    if self.resources.is_none() {
      return TickOutcome::TornDown;
    }
    if self.lifecycle.is_destroyed() {
      self.teardown();
      return TickOutcome::TornDown;
    }
    self.sync_lifecycle();

    let outcome = match self.scheduler.on_tick() {
      TickDecision::Suspended => return TickOutcome::Suspended,
      TickDecision::Skip => TickOutcome::Skipped,
      TickDecision::Busy => TickOutcome::Busy,
      TickDecision::Run => self.execute_cycle(),
    };
    if self.resources.is_some() {
      self.scheduler.adjust();
    }
    outcome
  }

  /// 忽略帧跳过计数立即尝试一个周期，挂起与销毁仍然生效
  pub fn run_cycle_now(&mut self) -> TickOutcome {
    if self.resources.is_none() {
      return TickOutcome::TornDown;
    }
    if self.lifecycle.is_destroyed() {
      self.teardown();
      return TickOutcome::TornDown;
    }
    self.sync_lifecycle();

    let outcome = match self.scheduler.try_begin_cycle() {
      TickDecision::Run => self.execute_cycle(),
      TickDecision::Busy => TickOutcome::Busy,
      TickDecision::Skip => TickOutcome::Skipped,
      TickDecision::Suspended => return TickOutcome::Suspended,
    };
    if self.resources.is_some() {
      self.scheduler.adjust();
    }
    outcome
  }

  fn execute_cycle(&mut self) -> TickOutcome {
    let start = Instant::now();
    let outcome = self.run_cycle();
    let latency = start.elapsed();

    self
      .scheduler
      .finish_cycle(outcome.is_completed().then_some(latency));
    if outcome.is_completed() {
      self.cycles += 1;
    }

    if self.lifecycle.is_destroyed() {
      self.teardown();
    } else if !self.lifecycle.should_run() {
      self.scheduler.suspend();
    }
    TickOutcome::Ran { outcome, latency }
  }

  fn run_cycle(&mut self) -> CycleOutcome {
    let Some(resources) = self.resources.as_mut() else {
      return CycleOutcome::Abandoned(CycleStage::Acquire);
    };

    let frame = match resources.acquirer.acquire() {
      Ok(frame) => frame,
      Err(e) => {
        debug!("帧不可用，跳过本周期: {}", e);
        return CycleOutcome::FrameUnavailable(e);
      }
    };
    if !self.lifecycle.should_run() {
      return CycleOutcome::Abandoned(CycleStage::Acquire);
    }

    let tensor = resources.preprocessor.transform(frame);
    if !self.lifecycle.should_run() {
      return CycleOutcome::Abandoned(CycleStage::Preprocess);
    }

    let output = match resources.invoker.run(tensor) {
      Ok(output) => output,
      Err(e) => {
        error!("推理失败，跳过本周期: {}", e);
        return CycleOutcome::InferenceFailed;
      }
    };
    if !self.lifecycle.should_run() {
      debug!("周期已取消，丢弃推理输出");
      return CycleOutcome::Abandoned(CycleStage::Inference);
    }

    let detection = self
      .scorer
      .score(&output, self.config.confidence_threshold());
    drop(output);
    if !self.lifecycle.should_run() {
      return CycleOutcome::Abandoned(CycleStage::Publish);
    }

    self.publish(detection);
    match detection {
      Some(detection) => CycleOutcome::Detected(detection),
      None => CycleOutcome::NotDetected,
    }
  }

  /// 状态变化时通知；保持激活时每个周期推送最新位置
  fn publish(&mut self, detection: Option<Detection>) {
    let position = detection.map(|d| {
      let (x, y) = d.screen_point(self.config.width(), self.config.height());
      self.estimator.estimate(x, y)
    });
    if let Some(d) = detection {
      debug!(
        "检测到目标 #{}: 置信度 {:.3}, 中心 ({:.3}, {:.3})",
        d.index, d.confidence, d.center_x, d.center_y
      );
    }

    let active = detection.is_some();
    if active || active != self.active {
      self.notify(active, position);
    }
  }

  fn notify(&mut self, active: bool, position: Option<Vec3>) {
    self.active = active;
    if let Err(e) = self.sink.on_detection_state_changed(active, position) {
      warn!("检测状态输出失败: {}", e);
    }
  }

  fn sync_lifecycle(&mut self) {
    let should_run = self.lifecycle.should_run();
    if !should_run && !self.scheduler.is_suspended() {
      self.scheduler.suspend();
    } else if should_run && self.scheduler.is_suspended() {
      self.scheduler.resume();
    }
  }

  /// 暂停检测；进行中的周期会在下一个检查点放弃
  pub fn suspend(&mut self) {
    self.lifecycle.suspend();
    self.scheduler.suspend();
  }

  /// 恢复检测：帧计数清零，耗时统计保留
  pub fn resume(&mut self) {
    if self.resources.is_none() {
      debug!("流水线已销毁，忽略恢复请求");
      return;
    }
    self.lifecycle.resume();
    if self.lifecycle.should_run() {
      self.scheduler.resume();
    } else {
      debug!("宿主仍处于暂停或失焦状态，暂不恢复");
    }
  }

  /// 释放全部原生资源；可重复调用
  pub fn teardown(&mut self) {
    let Some(mut resources) = self.resources.take() else {
      return;
    };
    self.scheduler.suspend();

    if let Err(e) = resources.invoker.release() {
      warn!("释放推理引擎失败: {}", e);
    }
    resources.acquirer.release();
    drop(resources);

    info!(
      "检测器资源已释放: 共完成 {} 个周期, 平均耗时 {:.2} ms",
      self.cycles,
      self.scheduler.average_processing_time_ms()
    );
  }

  pub fn is_torn_down(&self) -> bool {
    self.resources.is_none()
  }

  pub fn lifecycle(&self) -> LifecycleHandle {
    self.lifecycle.clone()
  }

  pub fn set_confidence_threshold(&mut self, threshold: f32) -> Result<(), ConfigError> {
    self.config.set_confidence_threshold(threshold)?;
    info!("置信度阈值设为 {}", threshold);
    Ok(())
  }

  pub fn set_frame_skip_interval(&mut self, interval: i64) {
    self.scheduler.set_frame_skip_interval(interval);
    info!(
      "帧跳过间隔设为 {}",
      self.scheduler.current_frame_skip_interval()
    );
  }

  pub fn current_frame_skip_interval(&self) -> u32 {
    self.scheduler.current_frame_skip_interval()
  }

  pub fn average_processing_time_ms(&self) -> f64 {
    self.scheduler.average_processing_time_ms()
  }

  pub fn detection_fps(&self, tick_delta: Duration) -> f64 {
    self.scheduler.detection_fps(tick_delta)
  }

  pub fn scheduler(&self) -> &AdaptiveScheduler {
    &self.scheduler
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn device(&self) -> Device {
    self.device
  }

  pub fn is_active(&self) -> bool {
    self.active
  }

  pub fn completed_cycles(&self) -> u64 {
    self.cycles
  }

  pub fn sink(&self) -> &K {
    &self.sink
  }
}

impl<S: FrameSource, E: InferenceEngine, K: DetectionSink> Drop for Pipeline<S, E, K> {
  fn drop(&mut self) {
    self.teardown();
  }
}

/// 宿主面对的检测组件
///
/// 初始化失败时进入 `Disabled`：不再跑任何周期，也不触碰输出端。
pub enum ObjectDetector<S: FrameSource, E: InferenceEngine, K: DetectionSink> {
  Active(Pipeline<S, E, K>),
  Disabled,
}

impl<S: FrameSource, E: InferenceEngine, K: DetectionSink> ObjectDetector<S, E, K> {
  pub fn start<L>(config: DetectorConfig, source: S, loader: &L, sink: K) -> Self
  where
    L: EngineLoader<Engine = E>,
  {
    match Pipeline::new(config, source, loader, sink) {
      Ok(pipeline) => ObjectDetector::Active(pipeline),
      Err(e) => {
        error!("检测器初始化失败，检测已禁用: {}", e);
        ObjectDetector::Disabled
      }
    }
  }

  pub fn tick(&mut self) -> TickOutcome {
    match self {
      ObjectDetector::Active(pipeline) => pipeline.tick(),
      ObjectDetector::Disabled => TickOutcome::Disabled,
    }
  }

  pub fn is_enabled(&self) -> bool {
    matches!(self, ObjectDetector::Active(_))
  }

  pub fn pipeline(&self) -> Option<&Pipeline<S, E, K>> {
    match self {
      ObjectDetector::Active(pipeline) => Some(pipeline),
      ObjectDetector::Disabled => None,
    }
  }

  pub fn pipeline_mut(&mut self) -> Option<&mut Pipeline<S, E, K>> {
    match self {
      ObjectDetector::Active(pipeline) => Some(pipeline),
      ObjectDetector::Disabled => None,
    }
  }

  pub fn lifecycle(&self) -> Option<LifecycleHandle> {
    self.pipeline().map(Pipeline::lifecycle)
  }
}
