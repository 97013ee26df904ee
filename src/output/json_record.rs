// 该文件是 Kashi （卡识） 项目的一部分。
// src/output/json_record.rs - JSON 行记录输出
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

use std::{
  fs::{File, OpenOptions},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, output::DetectionSink, score::Vec3};

#[derive(Error, Debug)]
pub enum JsonRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 每个检测事件写一行 JSON
///
/// `jsonl:///tmp/detections.jsonl` 只记录状态切换，加上 `?always` 记录每次位置更新。
pub struct JsonRecordOutput {
  path: PathBuf,
  writer: BufWriter<File>,
  active: bool,
  always: bool,
  sequence: u64,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonRecordOutputError::SchemeMismatch);
    }
    let always = url.query_pairs().any(|(k, _)| k == "always");
    JsonRecordOutput::create(url.path(), always)
  }
}

impl JsonRecordOutput {
  pub fn create(path: impl AsRef<Path>, always: bool) -> Result<Self, JsonRecordOutputError> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    info!("检测记录写入: {}", path.display());

    Ok(Self {
      path,
      writer: BufWriter::new(file),
      active: false,
      always,
      sequence: 0,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl DetectionSink for JsonRecordOutput {
  type Error = JsonRecordOutputError;

  fn on_detection_state_changed(
    &mut self,
    active: bool,
    position: Option<Vec3>,
  ) -> Result<(), Self::Error> {
    let changed = active != self.active;
    self.active = active;
    if !changed && !self.always {
      return Ok(());
    }

    self.sequence += 1;
    let record = json!({
      "seq": self.sequence,
      "time": Utc::now().to_rfc3339(),
      "active": active,
      "changed": changed,
      "position": position.map(|p| [p.x, p.y, p.z]),
    });
    serde_json::to_writer(&mut self.writer, &record)?;
    self.writer.write_all(b"\n")?;
    self.writer.flush()?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("kashi-{}-{}.jsonl", name, std::process::id()))
  }

  #[test]
  fn records_only_state_changes_by_default() {
    let path = temp_path("changes");
    let _ = std::fs::remove_file(&path);
    let url = Url::parse(&format!("jsonl://{}", path.display())).unwrap();
    let mut output = JsonRecordOutput::from_url(&url).unwrap();

    output
      .on_detection_state_changed(true, Some(Vec3::new(1.0, 2.0, 0.5)))
      .unwrap();
    output
      .on_detection_state_changed(true, Some(Vec3::new(3.0, 4.0, 0.5)))
      .unwrap();
    output.on_detection_state_changed(false, None).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = text
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["active"], true);
    assert_eq!(lines[0]["position"][1], 2.0);
    assert_eq!(lines[1]["active"], false);
    assert!(lines[1]["position"].is_null());

    let _ = std::fs::remove_file(&path);
  }

  #[test]
  fn creates_missing_parent_directory() {
    let dir = std::env::temp_dir().join(format!("kashi-nested-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let path = dir.join("records").join("events.jsonl");

    let mut output = JsonRecordOutput::create(&path, false).unwrap();
    output.on_detection_state_changed(true, None).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);

    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn always_records_position_updates() {
    let path = temp_path("always");
    let _ = std::fs::remove_file(&path);
    let mut output = JsonRecordOutput::create(&path, true).unwrap();

    output
      .on_detection_state_changed(true, Some(Vec3::new(1.0, 1.0, 0.5)))
      .unwrap();
    output
      .on_detection_state_changed(true, Some(Vec3::new(2.0, 2.0, 0.5)))
      .unwrap();

    let text = std::fs::read_to_string(output.path()).unwrap();
    assert_eq!(text.lines().count(), 2);
    let _ = std::fs::remove_file(&path);
  }
}
