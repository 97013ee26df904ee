// 该文件是 Kashi （卡识） 项目的一部分。
// src/input.rs - 帧源与帧获取
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

use crate::{FromUrl, frame::RgbFrame};

/// 帧源暂时无法提供帧
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameUnavailable {
  #[error("帧源尚未就绪")]
  NotReady,
  #[error("帧缓冲已释放")]
  Released,
  #[error("帧源错误: {0}")]
  Source(String),
}

/// 外部帧源：把当前画面写入调用方提供的缓冲
pub trait FrameSource {
  fn fill_frame(&mut self, frame: &mut RgbFrame) -> Result<(), FrameUnavailable>;

  /// 释放采集/渲染资源，由帧获取器保证只调用一次
  fn release(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn fill_frame(&mut self, frame: &mut RgbFrame) -> Result<(), FrameUnavailable> {
    (**self).fill_frame(frame)
  }

  fn release(&mut self) {
    (**self).release()
  }
}

/// 帧获取器，持有可复用的帧缓冲
pub struct FrameAcquirer<S> {
  source: S,
  buffer: Option<RgbFrame>,
}

impl<S: FrameSource> FrameAcquirer<S> {
  pub fn new(source: S, width: u32, height: u32) -> Self {
    debug!("分配帧缓冲: {}x{}", width, height);
    Self {
      source,
      buffer: Some(RgbFrame::with_shape(height as usize, width as usize)),
    }
  }

  /// 把帧源的当前画面写入复用缓冲；成功路径不分配内存
  pub fn acquire(&mut self) -> Result<&RgbFrame, FrameUnavailable> {
    let buffer = self.buffer.as_mut().ok_or(FrameUnavailable::Released)?;
    self.source.fill_frame(buffer)?;
    Ok(&*buffer)
  }

  pub fn is_released(&self) -> bool {
    self.buffer.is_none()
  }

  /// 释放帧缓冲与帧源，可重复调用
  pub fn release(&mut self) -> bool {
    match self.buffer.take() {
      Some(buffer) => {
        self.source.release();
        info!("帧源与帧缓冲已释放 ({} 字节)", buffer.len());
        true
      }
      None => false,
    }
  }

  pub fn source(&self) -> &S {
    &self.source
  }
}

mod synthetic;
pub use self::synthetic::{SyntheticSource, SyntheticSourceError};

#[cfg(feature = "read_image_file")]
mod image_file;
#[cfg(feature = "read_image_file")]
pub use self::image_file::{ImageFileSource, ImageFileSourceError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("合成帧源错误: {0}")]
  SyntheticSourceError(#[from] SyntheticSourceError),
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileSourceError(#[from] ImageFileSourceError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  Synthetic(SyntheticSource),
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileSource),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    if url.scheme() == SyntheticSource::SCHEME {
      return Ok(InputWrapper::Synthetic(SyntheticSource::from_url(url)?));
    }
    #[cfg(feature = "read_image_file")]
    {
      if url.scheme() == ImageFileSource::SCHEME {
        return Ok(InputWrapper::ImageFile(ImageFileSource::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl FrameSource for InputWrapper {
  fn fill_frame(&mut self, frame: &mut RgbFrame) -> Result<(), FrameUnavailable> {
    match self {
      InputWrapper::Synthetic(source) => source.fill_frame(frame),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFile(source) => source.fill_frame(frame),
    }
  }

  fn release(&mut self) {
    match self {
      InputWrapper::Synthetic(source) => source.release(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageFile(source) => source.release(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Flaky {
    calls: usize,
    released: usize,
  }

  impl FrameSource for Flaky {
    fn fill_frame(&mut self, frame: &mut RgbFrame) -> Result<(), FrameUnavailable> {
      self.calls += 1;
      if self.calls % 2 == 0 {
        return Err(FrameUnavailable::NotReady);
      }
      frame.as_mut().fill(self.calls as u8);
      Ok(())
    }

    fn release(&mut self) {
      self.released += 1;
    }
  }

  #[test]
  fn acquire_reuses_the_same_buffer() {
    let mut acquirer = FrameAcquirer::new(
      Flaky {
        calls: 0,
        released: 0,
      },
      4,
      2,
    );
    let first = acquirer.acquire().unwrap().as_ref().as_ptr();
    assert_eq!(acquirer.acquire().unwrap_err(), FrameUnavailable::NotReady);
    let frame = acquirer.acquire().unwrap();
    assert_eq!(frame.as_ref().as_ptr(), first);
    assert_eq!(frame.as_ref()[0], 3);
  }

  #[test]
  fn release_is_idempotent() {
    let mut acquirer = FrameAcquirer::new(
      Flaky {
        calls: 0,
        released: 0,
      },
      2,
      2,
    );
    assert!(acquirer.release());
    assert!(!acquirer.release());
    assert_eq!(acquirer.source().released, 1);
    assert_eq!(acquirer.acquire().unwrap_err(), FrameUnavailable::Released);
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("camera:///dev/video0").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }
}
