// 该文件是 Kashi （卡识） 项目的一部分。
// src/task.rs - 检测任务驱动
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
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::{
  input::FrameSource,
  model::InferenceEngine,
  output::DetectionSink,
  pipeline::{CycleOutcome, ObjectDetector, TickOutcome},
};

pub trait Task<D>: Sized {
  type Error;
  fn run_task(self, detector: D) -> Result<TaskSummary, Self::Error>;
}

/// 任务期间各类 tick 结果的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSummary {
  pub ticks: u64,
  pub cycles: u64,
  pub detections: u64,
  pub unavailable: u64,
  pub failures: u64,
  pub abandoned: u64,
}

impl TaskSummary {
  fn record(&mut self, outcome: &TickOutcome) {
    self.ticks += 1;
    let TickOutcome::Ran { outcome, .. } = outcome else {
      return;
    };
    match outcome {
      CycleOutcome::Detected(_) => {
        self.cycles += 1;
        self.detections += 1;
      }
      CycleOutcome::NotDetected => self.cycles += 1,
      CycleOutcome::FrameUnavailable(_) => self.unavailable += 1,
      CycleOutcome::InferenceFailed => self.failures += 1,
      CycleOutcome::Abandoned(_) => self.abandoned += 1,
    }
  }
}

/// 按固定帧率持续驱动检测器，直到销毁、中断或达到指定帧数
#[derive(Debug)]
pub struct ContinuousTask {
  tick_interval: Duration,
  tick_limit: Option<u64>,
  report_every: u64,
  handle_interrupt: bool,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self {
      tick_interval: Duration::from_secs_f64(1.0 / 60.0),
      tick_limit: None,
      report_every: 300,
      handle_interrupt: true,
    }
  }
}

impl ContinuousTask {
  pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
    self.tick_interval = tick_interval;
    self
  }

  pub fn with_tick_limit(mut self, tick_limit: Option<u64>) -> Self {
    self.tick_limit = tick_limit;
    self
  }

  /// 每隔多少 tick 输出一次统计，0 表示不输出
  pub fn with_report_every(mut self, report_every: u64) -> Self {
    self.report_every = report_every;
    self
  }

  pub fn with_interrupt_handler(mut self, handle_interrupt: bool) -> Self {
    self.handle_interrupt = handle_interrupt;
    self
  }
}

impl<S: FrameSource, E: InferenceEngine, K: DetectionSink> Task<ObjectDetector<S, E, K>>
  for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut detector: ObjectDetector<S, E, K>) -> Result<TaskSummary, Self::Error> {
    let mut summary = TaskSummary::default();
    let Some(lifecycle) = detector.lifecycle() else {
      warn!("检测器已禁用，任务直接结束");
      return Ok(summary);
    };

    if self.handle_interrupt {
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        lifecycle.on_destroy();
        thread::spawn(|| {
          thread::sleep(Duration::from_secs(30));
          warn!("强制退出程序");
          std::process::exit(1);
        });
      })
      .context("设置 Ctrl-C 处理函数失败")?;
    }

    info!("开始任务，tick 间隔 {:.2?}", self.tick_interval);
    let mut deadline = Instant::now();
    loop {
      let outcome = detector.tick();
      summary.record(&outcome);

      match &outcome {
        TickOutcome::TornDown | TickOutcome::Disabled => {
          info!("检测器已停止，退出任务循环");
          break;
        }
        TickOutcome::Ran { outcome, latency } => {
          debug!("第 {} 帧: {:?}, 耗时 {:.2?}", summary.ticks, outcome, latency);
        }
        _ => {}
      }

      if self.report_every > 0 && summary.ticks % self.report_every == 0 {
        if let Some(pipeline) = detector.pipeline() {
          info!(
            "第 {} 帧: 平均耗时 {:.2} ms, 跳过间隔 {}, 检测频率 {:.1} fps, 命中 {}/{}",
            summary.ticks,
            pipeline.average_processing_time_ms(),
            pipeline.current_frame_skip_interval(),
            pipeline.detection_fps(self.tick_interval),
            summary.detections,
            summary.cycles
          );
        }
      }

      if self.tick_limit.is_some_and(|n| summary.ticks >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.ticks);
        break;
      }

      deadline += self.tick_interval;
      let now = Instant::now();
      if deadline > now {
        thread::sleep(deadline - now);
      } else {
        deadline = now;
      }
    }

    if let Some(pipeline) = detector.pipeline_mut() {
      pipeline.teardown();
    }
    info!("任务完成，退出: {:?}", summary);
    Ok(summary)
  }
}

/// 不经帧跳过重复执行检测周期，统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat: usize,
  warmup: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      repeat: 1000,
      warmup: 2,
    }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat;
    self
  }

  pub fn with_warmup(mut self, warmup: usize) -> Self {
    self.warmup = warmup;
    self
  }
}

impl<S: FrameSource, E: InferenceEngine, K: DetectionSink> Task<ObjectDetector<S, E, K>>
  for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut detector: ObjectDetector<S, E, K>) -> Result<TaskSummary, Self::Error> {
    let pipeline = detector
      .pipeline_mut()
      .ok_or_else(|| anyhow::anyhow!("检测器已禁用"))?;

    info!("开始任务，重复 {} 次...", self.repeat);
    let mut summary = TaskSummary::default();
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let outcome = pipeline.run_cycle_now();
      summary.record(&outcome);
      match outcome {
        TickOutcome::Ran { outcome, latency } => {
          info!("({}) 周期完成: {:?}, 耗时 {:.2?}", i, outcome, latency);
          if outcome.is_completed() {
            times.push(latency);
          }
        }
        TickOutcome::TornDown => {
          warn!("检测器已销毁，提前结束");
          break;
        }
        other => debug!("({}) 未执行周期: {:?}", i, other),
      }
    }

    let measured = times.iter().skip(self.warmup).collect::<Vec<_>>();
    if measured.is_empty() {
      warn!("没有可统计的完整周期");
    } else {
      warn!(
        "平均周期耗时: {:.2?}",
        measured.iter().copied().sum::<Duration>() / measured.len() as u32
      );
    }

    pipeline.teardown();
    Ok(summary)
  }
}
