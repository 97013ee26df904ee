// 该文件是 Kashi （卡识） 项目的一部分。
// src/model/scripted.rs - 脚本化推理引擎
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

use std::{thread, time::Duration};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Device, DeviceCaps, EngineLoader, InferenceEngine},
  query_param,
  tensor::{
    ATTR_CENTER_X, ATTR_CENTER_Y, ATTR_CONFIDENCE, ATTR_HEIGHT, ATTR_WIDTH,
    DetectionOutput, MIN_DETECTION_ATTRIBUTES, ShapeError, Tensor,
  },
};

/// 原始模型每个候选框的属性数
const DEFAULT_ATTRIBUTES: usize = 13;
const DEFAULT_BOX_SIZE: f32 = 0.2;

#[derive(Error, Debug)]
pub enum ScriptedEngineError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法解析参数: {0}")]
  InvalidParameter(String),
  #[error("脚本为空")]
  EmptyScript,
  #[error("设备 {0} 不可用")]
  DeviceUnavailable(Device),
  #[error("输入张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputShape {
    expected: (usize, usize),
    actual: (usize, usize),
  },
  #[error("第 {0} 次推理按脚本失败")]
  Scripted(u64),
  #[error("输出形状错误: {0}")]
  Shape(#[from] ShapeError),
}

/// 按脚本返回置信度序列的加载器
///
/// `scripted://?conf=0.2,0.6,0.9;0.1&latency_ms=20&attrs=13&fail_every=0&gpu=true`
///
/// `conf` 中以 `;` 分隔的每一组对应一次推理的全部候选框，用完后循环。
#[derive(Debug, Clone)]
pub struct ScriptedLoader {
  script: Vec<Vec<f32>>,
  latency: Duration,
  attributes: usize,
  fail_every: u64,
  supports_gpu: bool,
  input_size: Option<(usize, usize)>,
}

impl FromUrlWithScheme for ScriptedLoader {
  const SCHEME: &'static str = "scripted";
}

impl FromUrl for ScriptedLoader {
  type Error = ScriptedEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ScriptedEngineError::SchemeMismatch);
    }

    let script = match url.query_pairs().find(|(k, _)| k == "conf") {
      Some((_, v)) => parse_script(&v)?,
      None => vec![vec![0.0]],
    };
    let latency_ms = query_param::<u64>(url, "latency_ms")
      .map_err(ScriptedEngineError::InvalidParameter)?
      .unwrap_or(0);
    let attributes = query_param::<usize>(url, "attrs")
      .map_err(ScriptedEngineError::InvalidParameter)?
      .unwrap_or(DEFAULT_ATTRIBUTES);
    let fail_every = query_param::<u64>(url, "fail_every")
      .map_err(ScriptedEngineError::InvalidParameter)?
      .unwrap_or(0);
    let supports_gpu = query_param::<bool>(url, "gpu")
      .map_err(ScriptedEngineError::InvalidParameter)?
      .unwrap_or(false);

    Ok(
      ScriptedLoader::new(script)?
        .latency(Duration::from_millis(latency_ms))
        .attributes(attributes)
        .fail_every(fail_every)
        .supports_gpu(supports_gpu),
    )
  }
}

fn parse_script(text: &str) -> Result<Vec<Vec<f32>>, ScriptedEngineError> {
  text
    .split(';')
    .map(|group| {
      group
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
          s.parse::<f32>()
            .map_err(|_| ScriptedEngineError::InvalidParameter(format!("conf={}", s)))
        })
        .collect::<Result<Vec<f32>, _>>()
    })
    .collect()
}

impl ScriptedLoader {
  pub fn new(script: Vec<Vec<f32>>) -> Result<Self, ScriptedEngineError> {
    if script.is_empty() {
      return Err(ScriptedEngineError::EmptyScript);
    }
    Ok(Self {
      script,
      latency: Duration::ZERO,
      attributes: DEFAULT_ATTRIBUTES,
      fail_every: 0,
      supports_gpu: false,
      input_size: None,
    })
  }

  pub fn latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  pub fn attributes(mut self, attributes: usize) -> Self {
    self.attributes = attributes;
    self
  }

  pub fn fail_every(mut self, fail_every: u64) -> Self {
    self.fail_every = fail_every;
    self
  }

  pub fn supports_gpu(mut self, supports_gpu: bool) -> Self {
    self.supports_gpu = supports_gpu;
    self
  }

  /// 限定输入张量尺寸，推理时校验
  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_size = Some((height as usize, width as usize));
    self
  }
}

impl EngineLoader for ScriptedLoader {
  type Engine = ScriptedEngine;
  type Error = ScriptedEngineError;

  fn capabilities(&self) -> DeviceCaps {
    DeviceCaps {
      supports_gpu: self.supports_gpu,
      ..DeviceCaps::detect()
    }
  }

  fn load(&self, device: Device) -> Result<Self::Engine, Self::Error> {
    if device == Device::Gpu && !self.supports_gpu {
      return Err(ScriptedEngineError::DeviceUnavailable(device));
    }
    if self.attributes < MIN_DETECTION_ATTRIBUTES {
      return Err(ShapeError::TooFewAttributes(self.attributes).into());
    }
    info!(
      "加载脚本化模型: {} 组置信度, 延迟 {:?}, 设备 {}",
      self.script.len(),
      self.latency,
      device
    );
    Ok(ScriptedEngine {
      loader: self.clone(),
      executions: 0,
      released: false,
    })
  }
}

pub struct ScriptedEngine {
  loader: ScriptedLoader,
  executions: u64,
  released: bool,
}

impl ScriptedEngine {
  pub fn executions(&self) -> u64 {
    self.executions
  }

  pub fn is_released(&self) -> bool {
    self.released
  }
}

impl InferenceEngine for ScriptedEngine {
  type Error = ScriptedEngineError;

  fn execute(&mut self, input: &Tensor) -> Result<DetectionOutput, Self::Error> {
    let actual = (input.height(), input.width());
    match self.loader.input_size {
      Some(expected) if expected != actual => {
        return Err(ScriptedEngineError::InputShape { expected, actual });
      }
      _ => {}
    }

    self.executions += 1;
    if !self.loader.latency.is_zero() {
      thread::sleep(self.loader.latency);
    }
    if self.loader.fail_every > 0 && self.executions % self.loader.fail_every == 0 {
      return Err(ScriptedEngineError::Scripted(self.executions));
    }

    let index = ((self.executions - 1) % self.loader.script.len() as u64) as usize;
    let confidences = &self.loader.script[index];
    let values = input.as_slice();
    let brightness = if values.is_empty() {
      0.0
    } else {
      values.iter().sum::<f32>() / values.len() as f32
    };

    let attributes = self.loader.attributes;
    let count = confidences.len();
    let mut rows = vec![vec![0.0f32; attributes]; count];
    for (i, (row, &conf)) in rows.iter_mut().zip(confidences).enumerate() {
      row[ATTR_CENTER_X] = (i as f32 + 0.5) / count as f32;
      row[ATTR_CENTER_Y] = brightness;
      row[ATTR_WIDTH] = DEFAULT_BOX_SIZE;
      row[ATTR_HEIGHT] = DEFAULT_BOX_SIZE;
      row[ATTR_CONFIDENCE] = conf;
    }
    debug!("脚本化推理 #{}: {:?}", self.executions, confidences);

    Ok(DetectionOutput::from_rows(&rows, attributes)?)
  }

  fn release(&mut self) -> Result<(), Self::Error> {
    debug!("脚本化引擎释放，共推理 {} 次", self.executions);
    self.released = true;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cycles_through_script() {
    let url = Url::parse("scripted://?conf=0.2,0.6,0.9;0.1&attrs=5").unwrap();
    let loader = ScriptedLoader::from_url(&url).unwrap();
    let mut engine = loader.load(Device::Cpu).unwrap();
    let input = Tensor::zeros(2, 2);

    let first = engine.execute(&input).unwrap();
    assert_eq!(first.shape(), [1, 1, 3, 5]);
    assert_eq!(first.confidence(1), 0.6);
    let second = engine.execute(&input).unwrap();
    assert_eq!(second.num_detections(), 1);
    let third = engine.execute(&input).unwrap();
    assert_eq!(third.confidence(2), 0.9);
  }

  #[test]
  fn scripted_failures_and_shape_checks() {
    let loader = ScriptedLoader::new(vec![vec![0.5]])
      .unwrap()
      .fail_every(2)
      .input_size(4, 3);
    let mut engine = loader.load(Device::Cpu).unwrap();

    assert!(matches!(
      engine.execute(&Tensor::zeros(2, 2)),
      Err(ScriptedEngineError::InputShape { .. })
    ));
    let input = Tensor::zeros(3, 4);
    assert!(engine.execute(&input).is_ok());
    assert!(matches!(
      engine.execute(&input),
      Err(ScriptedEngineError::Scripted(2))
    ));
  }

  #[test]
  fn gpu_requires_support() {
    let loader = ScriptedLoader::new(vec![vec![0.5]]).unwrap();
    assert!(matches!(
      loader.load(Device::Gpu),
      Err(ScriptedEngineError::DeviceUnavailable(Device::Gpu))
    ));
    assert!(loader.supports_gpu(true).load(Device::Gpu).is_ok());
  }
}
