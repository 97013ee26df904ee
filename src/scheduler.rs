// 该文件是 Kashi （卡识） 项目的一部分。
// src/scheduler.rs - 自适应帧跳过调度
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

use std::time::Duration;

use tracing::{debug, info};

use crate::config::DetectorConfig;

/// 样本数达到该值时衰减
pub const PERF_DECAY_WINDOW: u32 = 100;
/// 衰减后保留的样本权重
pub const PERF_DECAY_KEEP: u32 = 50;

/// 处理耗时的累计均值
///
/// 每 100 个样本把样本数折回 50 并把均值减半，限制长期漂移。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerfStats {
  avg_secs: f64,
  samples: u32,
}

impl PerfStats {
  pub fn record(&mut self, latency: Duration) {
    self.samples += 1;
    let n = f64::from(self.samples);
    self.avg_secs = (self.avg_secs * (n - 1.0) + latency.as_secs_f64()) / n;

    if self.samples >= PERF_DECAY_WINDOW {
      self.samples = PERF_DECAY_KEEP;
      self.avg_secs *= 0.5;
      debug!("处理耗时统计衰减，均值 {:.2} ms", self.average_ms());
    }
  }

  pub fn average(&self) -> Duration {
    Duration::from_secs_f64(self.avg_secs)
  }

  pub fn average_secs(&self) -> f64 {
    self.avg_secs
  }

  pub fn average_ms(&self) -> f64 {
    self.avg_secs * 1000.0
  }

  pub fn samples(&self) -> u32 {
    self.samples
  }
}

/// 当前帧跳过间隔与自上次运行以来的 tick 计数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerState {
  pub interval: u32,
  pub counter: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
  /// 挂起，不计数
  Idle,
  Skipping,
  /// 有一个检测周期正在进行
  Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
  Run,
  Skip,
  /// 该启动周期但上一个周期尚未结束
  Busy,
  Suspended,
}

/// 自适应调度器
///
/// 滞回控制而非 PID：平均耗时高于目标时加大间隔，低于目标一半时才缩小，
/// 两个不对称的阈值避免来回振荡。
#[derive(Debug, Clone)]
pub struct AdaptiveScheduler {
  state: SchedulerState,
  phase: SchedulerPhase,
  stats: PerfStats,
  target: Duration,
  min_skip: u32,
  max_skip: u32,
}

impl AdaptiveScheduler {
  pub fn new(config: &DetectorConfig) -> Self {
    Self {
      state: SchedulerState {
        interval: config.initial_frame_skip(),
        counter: 0,
      },
      phase: SchedulerPhase::Skipping,
      stats: PerfStats::default(),
      target: config.target_processing_time(),
      min_skip: config.min_frame_skip(),
      max_skip: config.max_frame_skip(),
    }
  }

  pub fn phase(&self) -> SchedulerPhase {
    self.phase
  }

  pub fn state(&self) -> SchedulerState {
    self.state
  }

  pub fn stats(&self) -> PerfStats {
    self.stats
  }

  /// 每个 tick 调用一次，决定本 tick 是否启动检测周期
  pub fn on_tick(&mut self) -> TickDecision {
    if self.phase == SchedulerPhase::Idle {
      return TickDecision::Suspended;
    }

    self.state.counter = self.state.counter.saturating_add(1);
    if self.state.counter < self.state.interval {
      return TickDecision::Skip;
    }
    self.try_begin_cycle()
  }

  /// 不看计数直接尝试启动周期；同一时刻只允许一个周期
  pub fn try_begin_cycle(&mut self) -> TickDecision {
    match self.phase {
      SchedulerPhase::Idle => TickDecision::Suspended,
      SchedulerPhase::Running => TickDecision::Busy,
      SchedulerPhase::Skipping => {
        self.state.counter = 0;
        self.phase = SchedulerPhase::Running;
        TickDecision::Run
      }
    }
  }

  /// 周期结束；`latency` 为 `None` 表示周期未完成，不计入统计
  pub fn finish_cycle(&mut self, latency: Option<Duration>) {
    if self.phase == SchedulerPhase::Running {
      self.phase = SchedulerPhase::Skipping;
    }
    if let Some(latency) = latency {
      self.record_latency(latency);
    }
  }

  pub fn record_latency(&mut self, latency: Duration) {
    self.stats.record(latency);
  }

  /// 根据平均耗时调整跳过间隔，返回调整后的间隔
  pub fn adjust(&mut self) -> u32 {
    let avg = self.stats.average_secs();
    let target = self.target.as_secs_f64();
    let before = self.state.interval;

    if avg > target {
      self.state.interval = self.state.interval.saturating_add(1).min(self.max_skip);
    } else if avg < target * 0.5 && self.state.interval > self.min_skip {
      self.state.interval = (self.state.interval - 1).max(self.min_skip);
    }

    if self.state.interval != before {
      debug!(
        "帧跳过间隔: {} -> {} (平均耗时 {:.2} ms)",
        before,
        self.state.interval,
        self.stats.average_ms()
      );
    }
    self.state.interval
  }

  /// 挂起调度；进行中的周期结束后保持挂起
  pub fn suspend(&mut self) {
    if self.phase != SchedulerPhase::Idle {
      info!("调度已挂起");
      self.phase = SchedulerPhase::Idle;
    }
  }

  /// 恢复调度：计数清零，保留耗时统计
  pub fn resume(&mut self) {
    self.state.counter = 0;
    if self.phase == SchedulerPhase::Idle {
      info!(
        "调度已恢复，平均耗时 {:.2} ms, 间隔 {}",
        self.stats.average_ms(),
        self.state.interval
      );
      self.phase = SchedulerPhase::Skipping;
    }
  }

  pub fn is_suspended(&self) -> bool {
    self.phase == SchedulerPhase::Idle
  }

  pub fn set_frame_skip_interval(&mut self, interval: i64) {
    self.state.interval = interval.clamp(i64::from(self.min_skip), i64::from(self.max_skip)) as u32;
  }

  pub fn current_frame_skip_interval(&self) -> u32 {
    self.state.interval
  }

  pub fn average_processing_time_ms(&self) -> f64 {
    self.stats.average_ms()
  }

  /// 按宿主帧间隔估算的检测频率
  pub fn detection_fps(&self, tick_delta: Duration) -> f64 {
    if tick_delta.is_zero() || self.state.interval == 0 {
      return 0.0;
    }
    (1.0 / tick_delta.as_secs_f64()) / f64::from(self.state.interval)
  }
}
