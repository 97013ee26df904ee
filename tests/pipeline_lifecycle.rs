// 该文件是 Kashi （卡识） 项目的一部分。
// tests/pipeline_lifecycle.rs - 流水线生命周期与资源释放测试
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
  convert::Infallible,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use thiserror::Error;

use kashi::{
  config::DetectorConfig,
  frame::RgbFrame,
  input::{FrameSource, FrameUnavailable},
  lifecycle::LifecycleHandle,
  model::{Device, DeviceCaps, EngineLoader, InferenceEngine},
  output::DetectionSink,
  pipeline::{CycleOutcome, CycleStage, ObjectDetector, Pipeline, TickOutcome},
  score::Vec3,
  tensor::{DetectionOutput, Tensor},
};

#[derive(Error, Debug)]
#[error("测试引擎错误")]
struct EngineFailure;

#[derive(Default)]
struct Counters {
  source_released: AtomicUsize,
  engine_released: AtomicUsize,
  executions: AtomicUsize,
  fills: AtomicUsize,
}

struct CountingSource {
  counters: Arc<Counters>,
  unavailable_until: usize,
}

impl FrameSource for CountingSource {
  fn fill_frame(&mut self, frame: &mut RgbFrame) -> Result<(), FrameUnavailable> {
    let n = self.counters.fills.fetch_add(1, Ordering::SeqCst) + 1;
    if n <= self.unavailable_until {
      return Err(FrameUnavailable::NotReady);
    }
    frame.as_mut().fill(128);
    Ok(())
  }

  fn release(&mut self) {
    self.counters.source_released.fetch_add(1, Ordering::SeqCst);
  }
}

/// 执行时可以触发挂起或销毁的引擎
enum Hook {
  None,
  Suspend,
  Destroy,
  FailOnce,
  /// 返回第二维为 0 的输出
  EmptyRows,
}

struct HookEngine {
  counters: Arc<Counters>,
  confidences: Vec<f32>,
  latency: Duration,
  hook: Hook,
  lifecycle: Arc<Mutex<Option<LifecycleHandle>>>,
}

impl InferenceEngine for HookEngine {
  type Error = EngineFailure;

  fn execute(&mut self, _input: &Tensor) -> Result<DetectionOutput, Self::Error> {
    self.counters.executions.fetch_add(1, Ordering::SeqCst);
    if !self.latency.is_zero() {
      std::thread::sleep(self.latency);
    }
    if matches!(self.hook, Hook::FailOnce) {
      self.hook = Hook::None;
      return Err(EngineFailure);
    }
    if matches!(self.hook, Hook::EmptyRows) {
      let output = DetectionOutput::new([1, 0, self.confidences.len(), 5], vec![])
        .map_err(|_| EngineFailure)?;
      return Ok(output);
    }
    let handle = self.lifecycle.lock().unwrap().clone();
    if let Some(handle) = handle {
      match self.hook {
        Hook::Suspend => handle.suspend(),
        Hook::Destroy => handle.on_destroy(),
        _ => {}
      }
    }
    let rows: Vec<[f32; 5]> = self
      .confidences
      .iter()
      .map(|&c| [0.25, 0.75, 0.1, 0.1, c])
      .collect();
    Ok(DetectionOutput::from_rows(&rows, 5).unwrap())
  }

  fn release(&mut self) -> Result<(), Self::Error> {
    self.counters.engine_released.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

struct HookLoader {
  counters: Arc<Counters>,
  confidences: Vec<f32>,
  latency: Duration,
  fail_load: bool,
  hook: fn() -> Hook,
  lifecycle: Arc<Mutex<Option<LifecycleHandle>>>,
}

#[derive(Error, Debug)]
#[error("模型加载失败")]
struct LoadFailure;

impl EngineLoader for HookLoader {
  type Engine = HookEngine;
  type Error = LoadFailure;

  fn capabilities(&self) -> DeviceCaps {
    DeviceCaps {
      supports_gpu: false,
      cpu_count: 1,
    }
  }

  fn load(&self, device: Device) -> Result<Self::Engine, Self::Error> {
    assert_eq!(device, Device::Cpu);
    if self.fail_load {
      return Err(LoadFailure);
    }
    Ok(HookEngine {
      counters: self.counters.clone(),
      confidences: self.confidences.clone(),
      latency: self.latency,
      hook: (self.hook)(),
      lifecycle: self.lifecycle.clone(),
    })
  }
}

#[derive(Clone, Default)]
struct SharedSink {
  events: Arc<Mutex<Vec<(bool, Option<Vec3>)>>>,
}

impl SharedSink {
  fn events(&self) -> Vec<(bool, Option<Vec3>)> {
    self.events.lock().unwrap().clone()
  }
}

impl DetectionSink for SharedSink {
  type Error = Infallible;

  fn on_detection_state_changed(
    &mut self,
    active: bool,
    position: Option<Vec3>,
  ) -> Result<(), Self::Error> {
    self.events.lock().unwrap().push((active, position));
    Ok(())
  }
}

struct Harness {
  counters: Arc<Counters>,
  sink: SharedSink,
  lifecycle: Arc<Mutex<Option<LifecycleHandle>>>,
}

impl Harness {
  fn new() -> Self {
    Self {
      counters: Arc::default(),
      sink: SharedSink::default(),
      lifecycle: Arc::default(),
    }
  }

  fn loader(&self, confidences: &[f32], hook: fn() -> Hook) -> HookLoader {
    HookLoader {
      counters: self.counters.clone(),
      confidences: confidences.to_vec(),
      latency: Duration::ZERO,
      fail_load: false,
      hook,
      lifecycle: self.lifecycle.clone(),
    }
  }

  fn source(&self, unavailable_until: usize) -> CountingSource {
    CountingSource {
      counters: self.counters.clone(),
      unavailable_until,
    }
  }

  fn config() -> DetectorConfig {
    DetectorConfig::builder()
      .input_size(8, 4)
      .frame_skip_bounds(1, 1)
      .target_processing_time(Duration::from_secs(1))
      .build()
      .unwrap()
  }

  fn pipeline(
    &self,
    confidences: &[f32],
    hook: fn() -> Hook,
  ) -> Pipeline<CountingSource, HookEngine, SharedSink> {
    let loader = self.loader(confidences, hook);
    let pipeline =
      Pipeline::new(Self::config(), self.source(0), &loader, self.sink.clone()).unwrap();
    *self.lifecycle.lock().unwrap() = Some(pipeline.lifecycle());
    pipeline
  }

  fn released(&self) -> (usize, usize) {
    (
      self.counters.source_released.load(Ordering::SeqCst),
      self.counters.engine_released.load(Ordering::SeqCst),
    )
  }
}

#[test]
fn teardown_twice_releases_once() {
  let harness = Harness::new();
  let mut pipeline = harness.pipeline(&[0.9], || Hook::None);
  pipeline.tick();

  pipeline.teardown();
  pipeline.teardown();
  assert_eq!(harness.released(), (1, 1));

  drop(pipeline);
  assert_eq!(harness.released(), (1, 1));
}

#[test]
fn drop_releases_resources() {
  let harness = Harness::new();
  let pipeline = harness.pipeline(&[0.9], || Hook::None);
  drop(pipeline);
  assert_eq!(harness.released(), (1, 1));
}

#[test]
fn suspend_during_inference_abandons_cycle() {
  let harness = Harness::new();
  let mut pipeline = harness.pipeline(&[0.9], || Hook::Suspend);
  let before = harness.sink.events().len();

  assert!(matches!(
    pipeline.tick(),
    TickOutcome::Ran {
      outcome: CycleOutcome::Abandoned(CycleStage::Inference),
      ..
    }
  ));
  assert_eq!(harness.sink.events().len(), before);
  assert_eq!(pipeline.scheduler().stats().samples(), 0);
  assert_eq!(pipeline.tick(), TickOutcome::Suspended);

  pipeline.teardown();
  assert_eq!(harness.released(), (1, 1));
  assert_eq!(harness.sink.events().len(), before);
}

#[test]
fn destroy_during_inference_releases_without_publishing() {
  let harness = Harness::new();
  let mut pipeline = harness.pipeline(&[0.9], || Hook::Destroy);

  assert!(matches!(
    pipeline.tick(),
    TickOutcome::Ran {
      outcome: CycleOutcome::Abandoned(CycleStage::Inference),
      ..
    }
  ));
  assert!(pipeline.is_torn_down());
  assert_eq!(harness.released(), (1, 1));
  assert_eq!(pipeline.tick(), TickOutcome::TornDown);
  assert_eq!(harness.sink.events(), vec![(false, None)]);
}

#[test]
fn resume_resets_counter_and_keeps_average() {
  let harness = Harness::new();
  let mut pipeline = harness.pipeline(&[0.9], || Hook::None);
  pipeline.tick();
  pipeline.tick();
  let average = pipeline.average_processing_time_ms();
  assert_eq!(pipeline.scheduler().stats().samples(), 2);

  pipeline.suspend();
  assert_eq!(pipeline.tick(), TickOutcome::Suspended);
  pipeline.resume();
  assert_eq!(pipeline.scheduler().state().counter, 0);
  assert_eq!(pipeline.average_processing_time_ms(), average);
}

#[test]
fn host_pause_and_focus_gate_ticks() {
  let harness = Harness::new();
  let mut pipeline = harness.pipeline(&[0.9], || Hook::None);
  let lifecycle = pipeline.lifecycle();

  lifecycle.on_pause(true);
  assert_eq!(pipeline.tick(), TickOutcome::Suspended);
  lifecycle.on_pause(false);
  lifecycle.on_focus_change(false);
  assert_eq!(pipeline.tick(), TickOutcome::Suspended);

  // 显式恢复不能越过宿主失焦
  pipeline.resume();
  assert_eq!(pipeline.tick(), TickOutcome::Suspended);

  lifecycle.on_focus_change(true);
  assert!(matches!(pipeline.tick(), TickOutcome::Ran { .. }));
  assert_eq!(harness.counters.executions.load(Ordering::SeqCst), 1);
}

#[test]
fn load_failure_disables_without_touching_sink() {
  let harness = Harness::new();
  let mut loader = harness.loader(&[0.9], || Hook::None);
  loader.fail_load = true;

  let mut detector = ObjectDetector::start(
    Harness::config(),
    harness.source(0),
    &loader,
    harness.sink.clone(),
  );
  assert!(!detector.is_enabled());
  for _ in 0..5 {
    assert_eq!(detector.tick(), TickOutcome::Disabled);
  }
  assert!(harness.sink.events().is_empty());
  assert_eq!(harness.counters.fills.load(Ordering::SeqCst), 0);
}

#[test]
fn inference_error_keeps_pipeline_alive() {
  let harness = Harness::new();
  let mut pipeline = harness.pipeline(&[0.9], || Hook::FailOnce);

  assert!(matches!(
    pipeline.tick(),
    TickOutcome::Ran {
      outcome: CycleOutcome::InferenceFailed,
      ..
    }
  ));
  assert_eq!(harness.sink.events(), vec![(false, None)]);
  assert_eq!(pipeline.scheduler().stats().samples(), 0);

  assert!(matches!(
    pipeline.tick(),
    TickOutcome::Ran {
      outcome: CycleOutcome::Detected(_),
      ..
    }
  ));
  assert!(pipeline.is_active());
  assert_eq!(harness.released(), (0, 0));
}

#[test]
fn malformed_output_fails_cycle_without_panicking() {
  let harness = Harness::new();
  let mut pipeline = harness.pipeline(&[0.9, 0.9, 0.9], || Hook::EmptyRows);

  for _ in 0..3 {
    assert!(matches!(
      pipeline.tick(),
      TickOutcome::Ran {
        outcome: CycleOutcome::InferenceFailed,
        ..
      }
    ));
  }
  assert!(!pipeline.is_torn_down());
  assert_eq!(pipeline.scheduler().stats().samples(), 0);
  assert_eq!(harness.sink.events(), vec![(false, None)]);
}

#[test]
fn unavailable_frame_skips_inference() {
  let harness = Harness::new();
  let loader = harness.loader(&[0.9], || Hook::None);
  let mut pipeline =
    Pipeline::new(Harness::config(), harness.source(2), &loader, harness.sink.clone()).unwrap();

  for _ in 0..2 {
    assert!(matches!(
      pipeline.tick(),
      TickOutcome::Ran {
        outcome: CycleOutcome::FrameUnavailable(FrameUnavailable::NotReady),
        ..
      }
    ));
  }
  assert_eq!(harness.counters.executions.load(Ordering::SeqCst), 0);
  assert_eq!(pipeline.scheduler().stats().samples(), 0);

  assert!(matches!(
    pipeline.tick(),
    TickOutcome::Ran {
      outcome: CycleOutcome::Detected(_),
      ..
    }
  ));
  assert_eq!(harness.counters.executions.load(Ordering::SeqCst), 1);
}

#[test]
fn published_position_uses_flipped_screen_point() {
  let harness = Harness::new();
  let mut pipeline = harness.pipeline(&[0.1, 0.8], || Hook::None);
  pipeline.tick();

  let events = harness.sink.events();
  assert_eq!(events.len(), 2);
  let (active, position) = events[1];
  assert!(active);
  // 输入 8x4，候选框中心 (0.25, 0.75)
  assert_eq!(position, Some(Vec3::new(2.0, 1.0, 0.5)));
}

#[test]
fn active_state_pushes_position_every_cycle() {
  let harness = Harness::new();
  let mut pipeline = harness.pipeline(&[0.9], || Hook::None);
  for _ in 0..3 {
    pipeline.tick();
  }
  let states: Vec<bool> = harness.sink.events().iter().map(|(a, _)| *a).collect();
  assert_eq!(states, vec![false, true, true, true]);
}
