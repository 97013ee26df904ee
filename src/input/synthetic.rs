// 该文件是 Kashi （卡识） 项目的一部分。
// src/input/synthetic.rs - 合成帧源
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
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{RGB_CHANNELS, RgbFrame},
  input::{FrameSource, FrameUnavailable},
  query_param,
};

#[derive(Error, Debug)]
pub enum SyntheticSourceError {
  #[error("URI scheme mismatch")]
  SchemaMismatch,
  #[error("无法解析参数: {0}")]
  InvalidParameter(String),
}

/// 生成滚动渐变画面的帧源，用于没有摄像头时驱动流水线
///
/// `synthetic://?warmup=3&unavailable_every=10`：前 `warmup` 次请求模拟相机未就绪，
/// 之后每隔 `unavailable_every` 次请求丢一帧。
#[derive(Debug, Default)]
pub struct SyntheticSource {
  warmup: u64,
  unavailable_every: u64,
  requests: u64,
  released: bool,
}

impl FromUrlWithScheme for SyntheticSource {
  const SCHEME: &'static str = "synthetic";
}

impl FromUrl for SyntheticSource {
  type Error = SyntheticSourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(SyntheticSourceError::SchemaMismatch);
    }

    let warmup = query_param::<u64>(url, "warmup")
      .map_err(SyntheticSourceError::InvalidParameter)?
      .unwrap_or(0);
    let unavailable_every = query_param::<u64>(url, "unavailable_every")
      .map_err(SyntheticSourceError::InvalidParameter)?
      .unwrap_or(0);

    Ok(SyntheticSource::new(warmup, unavailable_every))
  }
}

impl SyntheticSource {
  pub fn new(warmup: u64, unavailable_every: u64) -> Self {
    Self {
      warmup,
      unavailable_every,
      ..Default::default()
    }
  }

  pub fn requests(&self) -> u64 {
    self.requests
  }

  pub fn is_released(&self) -> bool {
    self.released
  }
}

impl FrameSource for SyntheticSource {
  fn fill_frame(&mut self, frame: &mut RgbFrame) -> Result<(), FrameUnavailable> {
    if self.released {
      return Err(FrameUnavailable::Released);
    }

    self.requests += 1;
    if self.requests <= self.warmup {
      return Err(FrameUnavailable::NotReady);
    }
    if self.unavailable_every > 0 && self.requests % self.unavailable_every == 0 {
      return Err(FrameUnavailable::Source(format!(
        "第 {} 帧被丢弃",
        self.requests
      )));
    }

    let width = frame.width();
    let shift = self.requests as usize;
    for (index, pixel) in frame.as_mut().chunks_exact_mut(RGB_CHANNELS).enumerate() {
      let x = index % width;
      let y = index / width;
      pixel[0] = ((x + shift) % 256) as u8;
      pixel[1] = ((y * 2) % 256) as u8;
      pixel[2] = ((x + y) % 256) as u8;
    }
    Ok(())
  }

  fn release(&mut self) {
    debug!("合成帧源已释放，共处理 {} 次请求", self.requests);
    self.released = true;
  }
}
