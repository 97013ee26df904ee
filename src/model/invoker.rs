// 该文件是 Kashi （卡识） 项目的一部分。
// src/model/invoker.rs - 推理调用器
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

use tracing::{debug, info};

use crate::{
  model::{Device, InferenceEngine, InferenceError},
  tensor::{DetectionOutput, Tensor},
};

/// 持有推理引擎句柄，整个流水线生命周期内有效
pub struct InferenceInvoker<E> {
  engine: Option<E>,
  device: Device,
}

impl<E: InferenceEngine> InferenceInvoker<E> {
  pub fn new(engine: E, device: Device) -> Self {
    Self {
      engine: Some(engine),
      device,
    }
  }

  pub fn device(&self) -> Device {
    self.device
  }

  pub fn is_released(&self) -> bool {
    self.engine.is_none()
  }

  /// 同步执行一次推理
  pub fn run(&mut self, input: &Tensor) -> Result<DetectionOutput, InferenceError> {
    let engine = self.engine.as_mut().ok_or(InferenceError::Released)?;

    debug!("执行模型推理");
    let output = engine
      .execute(input)
      .map_err(|e| InferenceError::Engine(Box::new(e)))?;
    debug!("模型输出形状: {:?}", output.shape());
    Ok(output)
  }

  /// 释放引擎句柄；只有第一次调用会真正释放，返回是否发生了释放
  pub fn release(&mut self) -> Result<bool, InferenceError> {
    match self.engine.take() {
      Some(mut engine) => {
        info!("释放推理引擎 ({})", self.device);
        engine
          .release()
          .map_err(|e| InferenceError::Engine(Box::new(e)))?;
        Ok(true)
      }
      None => Ok(false),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fmt;
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  #[derive(Debug)]
  struct Boom;

  impl fmt::Display for Boom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "boom")
    }
  }

  impl std::error::Error for Boom {}

  struct Counting {
    releases: Arc<AtomicUsize>,
    fail: bool,
  }

  impl InferenceEngine for Counting {
    type Error = Boom;

    fn execute(&mut self, _input: &Tensor) -> Result<DetectionOutput, Self::Error> {
      if self.fail {
        return Err(Boom);
      }
      Ok(DetectionOutput::from_rows(&[[0.5, 0.5, 0.1, 0.1, 0.9]], 5).unwrap())
    }

    fn release(&mut self) -> Result<(), Self::Error> {
      self.releases.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  #[test]
  fn release_happens_exactly_once() {
    let releases = Arc::new(AtomicUsize::new(0));
    let mut invoker = InferenceInvoker::new(
      Counting {
        releases: releases.clone(),
        fail: false,
      },
      Device::Cpu,
    );

    assert!(invoker.run(&Tensor::zeros(1, 1)).is_ok());
    assert!(invoker.release().unwrap());
    assert!(!invoker.release().unwrap());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(matches!(
      invoker.run(&Tensor::zeros(1, 1)),
      Err(InferenceError::Released)
    ));
  }

  #[test]
  fn engine_failure_is_wrapped() {
    let mut invoker = InferenceInvoker::new(
      Counting {
        releases: Arc::new(AtomicUsize::new(0)),
        fail: true,
      },
      Device::Gpu,
    );
    let err = invoker.run(&Tensor::zeros(1, 1)).unwrap_err();
    assert_eq!(err.to_string(), "推理执行失败: boom");
  }
}
