// 该文件是 Kashi （卡识） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 检测周期耗时基准
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use kashi::{
  FromUrl,
  config::DetectorConfigBuilder,
  input::InputWrapper,
  model::ScriptedLoader,
  output::OutputWrapper,
  pipeline::ObjectDetector,
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// 检测周期基准参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型加载器
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
  /// 检测器配置
  #[arg(long, value_name = "CONFIG", default_value = "detector://")]
  pub detector: Url,

  #[arg(long, value_name = "REPEAT", default_value = "1000")]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let config = DetectorConfigBuilder::from_url(&args.detector)?.build()?;
  let input = InputWrapper::from_url(&args.input)?;
  let loader = ScriptedLoader::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let detector = ObjectDetector::start(config, input, &loader, output);
  let summary = RepeatShotTask::default()
    .with_repeat(args.repeat)
    .run_task(detector)?;

  info!("{:?}", summary);
  Ok(())
}
