// 该文件是 Kashi （卡识） 项目的一部分。
// src/tensor.rs - 张量与预处理
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
use tracing::debug;

use crate::frame::{RGB_CHANNELS, RgbFrame};

/// 检测输出中每个候选框至少包含 [cx, cy, w, h, confidence]
pub const MIN_DETECTION_ATTRIBUTES: usize = 5;
pub const ATTR_CENTER_X: usize = 0;
pub const ATTR_CENTER_Y: usize = 1;
pub const ATTR_WIDTH: usize = 2;
pub const ATTR_HEIGHT: usize = 3;
pub const ATTR_CONFIDENCE: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeError {
  #[error("数据长度不匹配: 形状 {shape:?} 需要 {expected}, 实际 {actual}")]
  LengthMismatch {
    shape: [usize; 4],
    expected: usize,
    actual: usize,
  },
  #[error("每个检测至少需要 5 个属性，实际为 {0}")]
  TooFewAttributes(usize),
  #[error("批大小必须为 1，实际为 {0}")]
  UnsupportedBatch(usize),
  #[error("第二维必须为 1，实际为 {0}")]
  UnsupportedRows(usize),
}

/// NHWC 排列的输入张量，形状固定为 (1, height, width, 3)
#[derive(Debug, Clone)]
pub struct Tensor {
  shape: [usize; 4],
  data: Box<[f32]>,
}

impl Tensor {
  pub fn zeros(height: usize, width: usize) -> Self {
    let shape = [1, height, width, RGB_CHANNELS];
    Self {
      shape,
      data: vec![0.0; shape.iter().product()].into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn height(&self) -> usize {
    self.shape[1]
  }

  pub fn width(&self) -> usize {
    self.shape[2]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn get(&self, h: usize, w: usize, c: usize) -> f32 {
    self.data[(h * self.shape[2] + w) * self.shape[3] + c]
  }
}

/// 推理引擎的检测输出，形状为 (batch, 1, 检测数, 属性数)
#[derive(Debug, Clone)]
pub struct DetectionOutput {
  shape: [usize; 4],
  data: Vec<f32>,
}

impl DetectionOutput {
  pub fn new(shape: [usize; 4], data: Vec<f32>) -> Result<Self, ShapeError> {
    let expected: usize = shape.iter().product();
    if data.len() != expected {
      return Err(ShapeError::LengthMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }
    if shape[0] != 1 {
      return Err(ShapeError::UnsupportedBatch(shape[0]));
    }
    if shape[1] != 1 {
      return Err(ShapeError::UnsupportedRows(shape[1]));
    }
    if shape[3] < MIN_DETECTION_ATTRIBUTES {
      return Err(ShapeError::TooFewAttributes(shape[3]));
    }
    Ok(Self { shape, data })
  }

  /// 由逐行的属性数组构造，便于测试和脚本化引擎使用
  pub fn from_rows<R: AsRef<[f32]>>(rows: &[R], attributes: usize) -> Result<Self, ShapeError> {
    let mut data = Vec::with_capacity(rows.len() * attributes);
    for row in rows {
      let row = row.as_ref();
      data.extend(row.iter().copied().take(attributes));
      data.extend(std::iter::repeat_n(0.0, attributes.saturating_sub(row.len())));
    }
    Self::new([1, 1, rows.len(), attributes], data)
  }

  pub fn shape(&self) -> [usize; 4] {
    self.shape
  }

  pub fn num_detections(&self) -> usize {
    self.shape[2]
  }

  pub fn num_attributes(&self) -> usize {
    self.shape[3]
  }

  pub fn get(&self, b: usize, k: usize, i: usize, a: usize) -> f32 {
    let [_, rows, dets, attrs] = self.shape;
    self.data[((b * rows + k) * dets + i) * attrs + a]
  }

  pub fn attribute(&self, index: usize, attribute: usize) -> f32 {
    self.get(0, 0, index, attribute)
  }

  pub fn confidence(&self, index: usize) -> f32 {
    self.attribute(index, ATTR_CONFIDENCE)
  }
}

/// 把 RGB 字节逐通道除以 255，按原顺序写入浮点缓冲
pub fn normalize_rgb(src: &[u8], dst: &mut [f32]) {
  debug_assert_eq!(src.len(), dst.len());
  for (out, &value) in dst.iter_mut().zip(src) {
    *out = f32::from(value) / 255.0;
  }
}

/// 预处理器，复用同一块输入张量
pub struct Preprocessor {
  tensor: Tensor,
}

impl Preprocessor {
  pub fn new(width: u32, height: u32) -> Self {
    debug!("分配输入张量: 1x{}x{}x{}", height, width, RGB_CHANNELS);
    Self {
      tensor: Tensor::zeros(height as usize, width as usize),
    }
  }

  pub fn transform(&mut self, frame: &RgbFrame) -> &Tensor {
    debug_assert_eq!(
      (frame.height(), frame.width()),
      (self.tensor.height(), self.tensor.width())
    );
    normalize_rgb(frame.as_ref(), &mut self.tensor.data);
    &self.tensor
  }
}
