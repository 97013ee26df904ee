// 该文件是 Kashi （卡识） 项目的一部分。
// src/score.rs - 检测结果评分
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

use tracing::debug;

use crate::tensor::{ATTR_CENTER_X, ATTR_CENTER_Y, ATTR_HEIGHT, ATTR_WIDTH, DetectionOutput};

/// 屏幕平面的默认深度
pub const DEFAULT_SCREEN_DEPTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
  pub x: f32,
  pub y: f32,
  pub z: f32,
}

impl Vec3 {
  pub const fn new(x: f32, y: f32, z: f32) -> Self {
    Self { x, y, z }
  }
}

/// 单个检测结果，坐标均为归一化值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub index: usize,
  pub confidence: f32,
  pub center_x: f32,
  pub center_y: f32,
  pub width: f32,
  pub height: f32,
}

impl Detection {
  /// 转换为像素坐标，Y 轴向上翻转
  pub fn screen_point(&self, width: u32, height: u32) -> (i32, i32) {
    let x = (self.center_x * width as f32) as i32;
    let y = ((1.0 - self.center_y) * height as f32) as i32;
    (x, y)
  }
}

/// 把屏幕像素坐标映射到三维位置（相机反投影由宿主实现）
pub trait PositionEstimator {
  fn estimate(&self, screen_x: i32, screen_y: i32) -> Vec3;
}

/// 把屏幕点放在固定深度平面上的估计器
#[derive(Debug, Clone, Copy)]
pub struct ScreenSpace {
  pub depth: f32,
}

impl Default for ScreenSpace {
  fn default() -> Self {
    Self {
      depth: DEFAULT_SCREEN_DEPTH,
    }
  }
}

impl PositionEstimator for ScreenSpace {
  fn estimate(&self, screen_x: i32, screen_y: i32) -> Vec3 {
    Vec3::new(screen_x as f32, screen_y as f32, self.depth)
  }
}

/// 在有限扫描窗口内寻找置信度越过阈值的检测
///
/// 一旦当前最高置信度超过阈值就提前退出，因此返回的是窗口内第一个越过阈值的
/// 检测，而不一定是全局最优。阈值相等时不提前退出但仍算作有效检测。
#[derive(Debug, Clone, Copy)]
pub struct DetectionScorer {
  scan_cap: usize,
}

impl DetectionScorer {
  pub fn new(scan_cap: usize) -> Self {
    Self { scan_cap }
  }

  pub fn scan_cap(&self) -> usize {
    self.scan_cap
  }

  pub fn score(&self, output: &DetectionOutput, threshold: f32) -> Option<Detection> {
    let window = self.scan_cap.min(output.num_detections());
    let mut best: Option<(usize, f32)> = None;

    for i in 0..window {
      let conf = output.confidence(i);
      if best.is_none_or(|(_, best_conf)| conf > best_conf) {
        best = Some((i, conf));
      }
      // 越过阈值的候选必然是当前最高值
      if conf > threshold {
        debug!("第 {} 个检测越过阈值，提前退出扫描", i);
        break;
      }
    }

    let (index, confidence) = best.filter(|&(_, conf)| conf >= threshold)?;
    Some(Detection {
      index,
      confidence,
      center_x: output.attribute(index, ATTR_CENTER_X),
      center_y: output.attribute(index, ATTR_CENTER_Y),
      width: output.attribute(index, ATTR_WIDTH),
      height: output.attribute(index, ATTR_HEIGHT),
    })
  }
}
