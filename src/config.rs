// 该文件是 Kashi （卡识） 项目的一部分。
// src/config.rs - 检测器配置
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

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, query_param};

pub const DEFAULT_INPUT_WIDTH: u32 = 320;
pub const DEFAULT_INPUT_HEIGHT: u32 = 240;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_TARGET_PROCESSING_TIME: Duration = Duration::from_millis(33);
pub const DEFAULT_MIN_FRAME_SKIP: u32 = 1;
pub const DEFAULT_MAX_FRAME_SKIP: u32 = 5;
pub const DEFAULT_INITIAL_FRAME_SKIP: u32 = 2;
pub const DEFAULT_SCAN_CAP: usize = 1000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("输入尺寸无效: {width}x{height}")]
  InvalidInputSize { width: u32, height: u32 },
  #[error("置信度阈值必须位于 (0, 1] 区间内，实际为 {0}")]
  InvalidThreshold(f32),
  #[error("目标处理时间必须大于零")]
  InvalidTargetTime,
  #[error("帧跳过区间无效: [{min}, {max}]")]
  InvalidSkipBounds { min: u32, max: u32 },
  #[error("扫描上限必须大于零")]
  InvalidScanCap,
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法解析参数: {0}")]
  InvalidParameter(String),
}

/// 检测器配置
///
/// 除置信度阈值外，构造后不可修改。
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  width: u32,
  height: u32,
  confidence_threshold: f32,
  prefer_gpu: bool,
  target_processing_time: Duration,
  min_frame_skip: u32,
  max_frame_skip: u32,
  initial_frame_skip: u32,
  scan_cap: usize,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      width: DEFAULT_INPUT_WIDTH,
      height: DEFAULT_INPUT_HEIGHT,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      prefer_gpu: true,
      target_processing_time: DEFAULT_TARGET_PROCESSING_TIME,
      min_frame_skip: DEFAULT_MIN_FRAME_SKIP,
      max_frame_skip: DEFAULT_MAX_FRAME_SKIP,
      initial_frame_skip: DEFAULT_INITIAL_FRAME_SKIP,
      scan_cap: DEFAULT_SCAN_CAP,
    }
  }
}

impl DetectorConfig {
  pub fn builder() -> DetectorConfigBuilder {
    DetectorConfigBuilder::default()
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  pub fn prefer_gpu(&self) -> bool {
    self.prefer_gpu
  }

  pub fn target_processing_time(&self) -> Duration {
    self.target_processing_time
  }

  pub fn min_frame_skip(&self) -> u32 {
    self.min_frame_skip
  }

  pub fn max_frame_skip(&self) -> u32 {
    self.max_frame_skip
  }

  pub fn initial_frame_skip(&self) -> u32 {
    self.initial_frame_skip
  }

  pub fn scan_cap(&self) -> usize {
    self.scan_cap
  }

  /// 修改置信度阈值，超出 (0, 1] 时保持原值并返回错误
  pub fn set_confidence_threshold(&mut self, threshold: f32) -> Result<(), ConfigError> {
    validate_threshold(threshold)?;
    debug!(
      "置信度阈值: {} -> {}",
      self.confidence_threshold, threshold
    );
    self.confidence_threshold = threshold;
    Ok(())
  }
}

fn validate_threshold(threshold: f32) -> Result<(), ConfigError> {
  // NaN 也会在这里被拒绝
  if threshold > 0.0 && threshold <= 1.0 {
    Ok(())
  } else {
    Err(ConfigError::InvalidThreshold(threshold))
  }
}

#[derive(Debug, Clone)]
pub struct DetectorConfigBuilder {
  config: DetectorConfig,
}

impl Default for DetectorConfigBuilder {
  fn default() -> Self {
    Self {
      config: DetectorConfig::default(),
    }
  }
}

impl DetectorConfigBuilder {
  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.config.width = width;
    self.config.height = height;
    self
  }

  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.config.confidence_threshold = threshold;
    self
  }

  pub fn prefer_gpu(mut self, prefer_gpu: bool) -> Self {
    self.config.prefer_gpu = prefer_gpu;
    self
  }

  pub fn target_processing_time(mut self, target: Duration) -> Self {
    self.config.target_processing_time = target;
    self
  }

  pub fn frame_skip_bounds(mut self, min: u32, max: u32) -> Self {
    self.config.min_frame_skip = min;
    self.config.max_frame_skip = max;
    self
  }

  pub fn initial_frame_skip(mut self, skip: u32) -> Self {
    self.config.initial_frame_skip = skip;
    self
  }

  pub fn scan_cap(mut self, scan_cap: usize) -> Self {
    self.config.scan_cap = scan_cap;
    self
  }

  pub fn build(self) -> Result<DetectorConfig, ConfigError> {
    let mut config = self.config;

    if config.width == 0 || config.height == 0 {
      return Err(ConfigError::InvalidInputSize {
        width: config.width,
        height: config.height,
      });
    }
    validate_threshold(config.confidence_threshold)?;
    if config.target_processing_time.is_zero() {
      return Err(ConfigError::InvalidTargetTime);
    }
    if config.min_frame_skip == 0 || config.min_frame_skip > config.max_frame_skip {
      return Err(ConfigError::InvalidSkipBounds {
        min: config.min_frame_skip,
        max: config.max_frame_skip,
      });
    }
    if config.scan_cap == 0 {
      return Err(ConfigError::InvalidScanCap);
    }

    config.initial_frame_skip = config
      .initial_frame_skip
      .clamp(config.min_frame_skip, config.max_frame_skip);

    debug!("检测器配置: {:?}", config);
    Ok(config)
  }
}

impl FromUrlWithScheme for DetectorConfigBuilder {
  const SCHEME: &'static str = "detector";
}

impl FromUrl for DetectorConfigBuilder {
  type Error = ConfigError;

  /// 例如 `detector://?width=320&height=240&confidence=0.5&gpu=true&target_ms=33`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ConfigError::SchemeMismatch);
    }

    let mut builder = DetectorConfigBuilder::default();

    if let Some(width) = param::<u32>(url, "width")? {
      builder.config.width = width;
    }
    if let Some(height) = param::<u32>(url, "height")? {
      builder.config.height = height;
    }
    if let Some(target) = param::<u64>(url, "target_ms")? {
      builder.config.target_processing_time = Duration::from_millis(target);
    }
    if let Some(min) = param::<u32>(url, "min_skip")? {
      builder.config.min_frame_skip = min;
    }
    if let Some(max) = param::<u32>(url, "max_skip")? {
      builder.config.max_frame_skip = max;
    }
    if let Some(skip) = param::<u32>(url, "skip")? {
      builder.config.initial_frame_skip = skip;
    }
    if let Some(cap) = param::<usize>(url, "scan_cap")? {
      builder.config.scan_cap = cap;
    }
    if let Some(threshold) = param::<f32>(url, "confidence")? {
      builder.config.confidence_threshold = threshold;
    }
    if let Some(gpu) = param::<bool>(url, "gpu")? {
      builder.config.prefer_gpu = gpu;
    }

    Ok(builder)
  }
}

/// 超出目标类型范围的值按解析失败处理
fn param<T: std::str::FromStr>(url: &Url, key: &str) -> Result<Option<T>, ConfigError> {
  query_param::<T>(url, key).map_err(ConfigError::InvalidParameter)
}
