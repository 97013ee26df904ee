// 该文件是 Kashi （卡识） 项目的一部分。
// src/model.rs - 推理引擎接口
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

use std::fmt;

use thiserror::Error;

use crate::tensor::{DetectionOutput, Tensor};

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 外部推理引擎
pub trait InferenceEngine {
  type Error: std::error::Error + Send + Sync + 'static;

  fn execute(&mut self, input: &Tensor) -> Result<DetectionOutput, Self::Error>;

  /// 释放引擎占用的原生资源，由调用方保证只调用一次
  fn release(&mut self) -> Result<(), Self::Error> {
    Ok(())
  }
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
  type Error = E::Error;

  fn execute(&mut self, input: &Tensor) -> Result<DetectionOutput, Self::Error> {
    (**self).execute(input)
  }

  fn release(&mut self) -> Result<(), Self::Error> {
    (**self).release()
  }
}

/// 负责加载模型并在选定设备上创建推理引擎
pub trait EngineLoader {
  type Engine: InferenceEngine;
  type Error: std::error::Error + Send + Sync + 'static;

  fn capabilities(&self) -> DeviceCaps {
    DeviceCaps::detect()
  }

  fn load(&self, device: Device) -> Result<Self::Engine, Self::Error>;
}

/// 推理设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Gpu,
  CpuParallel,
  Cpu,
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Gpu => write!(f, "gpu"),
      Device::CpuParallel => write!(f, "cpu-parallel"),
      Device::Cpu => write!(f, "cpu"),
    }
  }
}

/// 宿主平台能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
  pub supports_gpu: bool,
  pub cpu_count: usize,
}

impl DeviceCaps {
  pub fn detect() -> Self {
    Self {
      supports_gpu: false,
      cpu_count: std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1),
    }
  }
}

pub const PARALLEL_CPU_THRESHOLD: usize = 4;

/// 优先 GPU；否则 4 核及以上走多核 CPU，其余单核
pub fn select_device(prefer_gpu: bool, caps: DeviceCaps) -> Device {
  if prefer_gpu && caps.supports_gpu {
    Device::Gpu
  } else if caps.cpu_count >= PARALLEL_CPU_THRESHOLD {
    Device::CpuParallel
  } else {
    Device::Cpu
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理引擎已释放")]
  Released,
  #[error("推理执行失败: {0}")]
  Engine(#[source] BoxedError),
}

mod invoker;
pub use self::invoker::InferenceInvoker;

mod scripted;
pub use self::scripted::{ScriptedEngine, ScriptedEngineError, ScriptedLoader};
