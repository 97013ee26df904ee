// 该文件是 Kashi （卡识） 项目的一部分。
// src/output.rs - 检测状态输出
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, score::Vec3};

/// 接收检测状态的 UI/状态端
pub trait DetectionSink {
  type Error: std::error::Error + Send + Sync + 'static;
  fn on_detection_state_changed(
    &mut self,
    active: bool,
    position: Option<Vec3>,
  ) -> Result<(), Self::Error>;
}

impl<K: DetectionSink + ?Sized> DetectionSink for Box<K> {
  type Error = K::Error;

  fn on_detection_state_changed(
    &mut self,
    active: bool,
    position: Option<Vec3>,
  ) -> Result<(), Self::Error> {
    (**self).on_detection_state_changed(active, position)
  }
}

mod log_sink;
pub use self::log_sink::{LogSink, LogSinkError};

#[cfg(feature = "json_record")]
mod json_record;
#[cfg(feature = "json_record")]
pub use self::json_record::{JsonRecordOutput, JsonRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("日志输出错误: {0}")]
  LogSinkError(#[from] LogSinkError),
  #[cfg(feature = "json_record")]
  #[error("JSON 记录输出错误: {0}")]
  JsonRecordOutputError(#[from] JsonRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  Log(LogSink),
  #[cfg(feature = "json_record")]
  JsonRecord(JsonRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogSink::SCHEME => Ok(OutputWrapper::Log(LogSink::from_url(url)?)),
      #[cfg(feature = "json_record")]
      JsonRecordOutput::SCHEME => Ok(OutputWrapper::JsonRecord(JsonRecordOutput::from_url(
        url,
      )?)),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl DetectionSink for OutputWrapper {
  type Error = OutputError;

  fn on_detection_state_changed(
    &mut self,
    active: bool,
    position: Option<Vec3>,
  ) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Log(sink) => sink
        .on_detection_state_changed(active, position)
        .map_err(OutputError::from),
      #[cfg(feature = "json_record")]
      OutputWrapper::JsonRecord(sink) => sink
        .on_detection_state_changed(active, position)
        .map_err(OutputError::from),
    }
  }
}
