// 该文件是 Kashi （卡识） 项目的一部分。
// src/frame.rs - RGB 帧缓冲定义
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

pub const RGB_CHANNELS: usize = 3;

/// 固定尺寸的 RGB 帧缓冲（HWC 排列）
///
/// 缓冲区在创建时一次性分配，长度恒为 `width * height * 3`。
#[derive(Debug, Clone)]
pub struct RgbFrame {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl RgbFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let size = RGB_CHANNELS * width * height;
    Self {
      width,
      height,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  pub fn from_vec(height: usize, width: usize, data: Vec<u8>) -> Option<Self> {
    if data.len() != RGB_CHANNELS * width * height {
      return None;
    }
    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn pixel(&self, x: usize, y: usize) -> [u8; RGB_CHANNELS] {
    let base = (y * self.width + x) * RGB_CHANNELS;
    [self.data[base], self.data[base + 1], self.data[base + 2]]
  }
}

impl AsRef<[u8]> for RgbFrame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

impl AsMut<[u8]> for RgbFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn buffer_size_matches_shape() {
    let frame = RgbFrame::with_shape(240, 320);
    assert_eq!(frame.len(), 320 * 240 * 3);
    assert_eq!((frame.width(), frame.height()), (320, 240));
  }

  #[test]
  fn from_vec_rejects_wrong_length() {
    assert!(RgbFrame::from_vec(2, 2, vec![0; 11]).is_none());
    let frame = RgbFrame::from_vec(1, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
    assert_eq!(frame.pixel(1, 0), [4, 5, 6]);
  }
}
