// 该文件是 Kashi （卡识） 项目的一部分。
// src/input/image_file.rs - 图像文件帧源
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

use image::{ImageReader, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  input::{FrameSource, FrameUnavailable},
};

#[derive(Error, Debug)]
pub enum ImageFileSourceError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(image::ImageError),
}

impl From<std::io::Error> for ImageFileSourceError {
  fn from(err: std::io::Error) -> Self {
    ImageFileSourceError::IoError(err)
  }
}

impl From<image::ImageError> for ImageFileSourceError {
  fn from(err: image::ImageError) -> Self {
    ImageFileSourceError::ImageLoadError(err)
  }
}

/// 把一张静态图片当作相机画面反复提供
///
/// 图片在第一次请求时按帧缓冲尺寸做双线性缩放，之后只做拷贝。
pub struct ImageFileSource {
  image: Option<RgbImage>,
  resized: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileSource {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileSource {
  type Error = ImageFileSourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileSourceError::SchemaMismatch);
    }

    let path = url.path();
    info!("加载图像文件: {}", path);
    let image = ImageReader::open(path)?.decode()?;

    Ok(ImageFileSource::from_image(image.into()))
  }
}

impl ImageFileSource {
  pub fn from_image(image: RgbImage) -> Self {
    Self {
      image: Some(image),
      resized: None,
    }
  }

  fn resized_for(&mut self, width: u32, height: u32) -> Result<&RgbImage, FrameUnavailable> {
    let stale = self
      .resized
      .as_ref()
      .is_none_or(|img| img.dimensions() != (width, height));
    if stale {
      let image = self.image.as_ref().ok_or(FrameUnavailable::Released)?;
      debug!(
        "缩放图像: {:?} -> {}x{}",
        image.dimensions(),
        width,
        height
      );
      self.resized = Some(image::imageops::resize(
        image,
        width,
        height,
        FilterType::Triangle,
      ));
    }
    self.resized.as_ref().ok_or(FrameUnavailable::Released)
  }
}

impl FrameSource for ImageFileSource {
  fn fill_frame(&mut self, frame: &mut RgbFrame) -> Result<(), FrameUnavailable> {
    if self.image.is_none() {
      return Err(FrameUnavailable::Released);
    }
    let resized = self.resized_for(frame.width() as u32, frame.height() as u32)?;
    frame.as_mut().copy_from_slice(resized.as_raw());
    Ok(())
  }

  fn release(&mut self) {
    self.image = None;
    self.resized = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn fills_frame_with_resized_image() {
    let image = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
    let mut source = ImageFileSource::from_image(image);
    let mut frame = RgbFrame::with_shape(2, 4);

    source.fill_frame(&mut frame).unwrap();
    assert_eq!(frame.pixel(3, 1), [10, 20, 30]);

    source.release();
    assert_eq!(source.fill_frame(&mut frame), Err(FrameUnavailable::Released));
  }
}
