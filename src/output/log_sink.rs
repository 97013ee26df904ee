// 该文件是 Kashi （卡识） 项目的一部分。
// src/output/log_sink.rs - 日志输出
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
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::DetectionSink, score::Vec3};

#[derive(Error, Debug)]
pub enum LogSinkError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 把检测状态写入日志；状态切换用 info，位置更新用 debug
#[derive(Debug, Default)]
pub struct LogSink {
  active: bool,
  events: u64,
}

impl FromUrlWithScheme for LogSink {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogSink {
  type Error = LogSinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogSinkError::SchemeMismatch);
    }
    Ok(LogSink::default())
  }
}

impl LogSink {
  pub fn is_active(&self) -> bool {
    self.active
  }

  pub fn events(&self) -> u64 {
    self.events
  }
}

impl DetectionSink for LogSink {
  type Error = LogSinkError;

  fn on_detection_state_changed(
    &mut self,
    active: bool,
    position: Option<Vec3>,
  ) -> Result<(), Self::Error> {
    self.events += 1;
    if active != self.active {
      match position {
        Some(p) => info!(
          "检测状态: {} 位置 ({:.1}, {:.1}, {:.2})",
          active, p.x, p.y, p.z
        ),
        None => info!("检测状态: {}", active),
      }
      self.active = active;
    } else if let Some(p) = position {
      debug!("检测位置更新: ({:.1}, {:.1}, {:.2})", p.x, p.y, p.z);
    }
    Ok(())
  }
}
