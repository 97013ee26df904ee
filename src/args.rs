// 该文件是 Kashi （卡识） 项目的一部分。
// src/args.rs - 命令行参数
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

use anyhow::Context;
use clap::Parser;
use url::Url;

use kashi::{
  FromUrl,
  config::{ConfigError, DetectorConfig, DetectorConfigBuilder},
};

/// Kashi 自适应检测循环
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型加载器，例如 scripted://?conf=0.2,0.9;0.1&latency_ms=20
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 帧来源，例如 synthetic:// 或 image:///path/to/card.png
  #[arg(long, value_name = "SOURCE", default_value = "synthetic://")]
  pub input: Url,

  /// 检测状态输出，例如 log:// 或 jsonl:///tmp/detections.jsonl
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,

  /// 检测器配置，例如 detector://?width=320&height=240&target_ms=33
  #[arg(long, value_name = "CONFIG")]
  pub detector: Option<Url>,

  /// 置信度阈值 (0.0 - 1.0)，覆盖配置中的值
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// 宿主帧率
  #[arg(long, default_value = "60", value_name = "FPS")]
  pub fps: f64,

  /// 运行的 tick 数，缺省时一直运行到 Ctrl-C
  #[arg(long, value_name = "TICKS")]
  pub ticks: Option<u64>,

  /// 每隔多少 tick 输出一次统计，0 表示不输出
  #[arg(long, default_value = "300", value_name = "TICKS")]
  pub report_every: u64,
}

impl Args {
  pub fn detector_config(&self) -> Result<DetectorConfig, ConfigError> {
    let mut builder = match &self.detector {
      Some(url) => DetectorConfigBuilder::from_url(url)?,
      None => DetectorConfig::builder(),
    };
    if let Some(confidence) = self.confidence {
      builder = builder.confidence_threshold(confidence);
    }
    builder.build()
  }

  /// 非正帧率表示不限速
  pub fn tick_interval(&self) -> anyhow::Result<Duration> {
    if self.fps > 0.0 {
      Duration::try_from_secs_f64(1.0 / self.fps)
        .with_context(|| format!("无法换算帧间隔: fps = {}", self.fps))
    } else {
      Ok(Duration::ZERO)
    }
  }
}
