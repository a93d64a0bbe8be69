// 该文件是 Shouwang （守望） 项目的一部分。
// src/output/report.rs - 检测结果 JSON 报告
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

//! 实时模式的单行 JSON 输出，以及批处理模式 `--record` 的逐帧 JSON Lines 记录。
//!
//! `confidence` 以 `f32` 序列化，输出为能精确还原该 `f32` 的最短十进制表示
//! （例如检测器给出 0.8734 时输出 `0.8734`）。

use std::{
  fs::File,
  io::{BufWriter, Write},
  path::Path,
};

use serde::Serialize;

use crate::{
  classify::{Category, ClassifiedDetection, FrameResult},
  normalize::PixelBox,
  output::ensure_parent_dir,
};

/// 单个检测的报告形式
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
  #[serde(rename = "type")]
  pub kind: Category,
  pub label: String,
  pub confidence: f32,
  pub bbox: PixelBox,
}

impl From<&ClassifiedDetection> for DetectionReport {
  fn from(detection: &ClassifiedDetection) -> Self {
    Self {
      kind: detection.category,
      label: detection.label.to_string(),
      confidence: detection.confidence,
      bbox: detection.bbox,
    }
  }
}

/// 实时模式的单帧报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveReport {
  pub pets: usize,
  pub humans: usize,
  pub detections: Vec<DetectionReport>,
}

impl From<&FrameResult> for LiveReport {
  fn from(result: &FrameResult) -> Self {
    Self {
      pets: result.pet_count,
      humans: result.human_count,
      detections: result.detections.iter().map(DetectionReport::from).collect(),
    }
  }
}

impl LiveReport {
  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }
}

#[derive(Serialize)]
struct ErrorReport<'a> {
  error: &'a str,
}

/// 失败时的 JSON 行 `{"error": "..."}`
pub fn error_json(message: &str) -> String {
  serde_json::to_string(&ErrorReport { error: message })
    .unwrap_or_else(|_| String::from(r#"{"error":"unknown error"}"#))
}

#[derive(Serialize)]
struct FrameRecord<'a> {
  frame: u64,
  #[serde(flatten)]
  report: &'a LiveReport,
}

/// 逐帧检测记录（JSON Lines）
pub struct DetectionRecorder {
  writer: BufWriter<File>,
  records: u64,
}

impl DetectionRecorder {
  pub fn create(path: &Path) -> Result<Self, std::io::Error> {
    ensure_parent_dir(path)?;
    let file = File::create(path)?;
    Ok(Self {
      writer: BufWriter::new(file),
      records: 0,
    })
  }

  pub fn record(&mut self, frame: u64, result: &FrameResult) -> Result<(), std::io::Error> {
    let report = LiveReport::from(result);
    serde_json::to_writer(&mut self.writer, &FrameRecord {
      frame,
      report: &report,
    })?;
    self.writer.write_all(b"\n")?;
    self.records += 1;
    Ok(())
  }

  pub fn records(&self) -> u64 {
    self.records
  }

  pub fn flush(&mut self) -> Result<(), std::io::Error> {
    self.writer.flush()
  }
}
