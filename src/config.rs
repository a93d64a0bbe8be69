// 该文件是 Shouwang （守望） 项目的一部分。
// src/config.rs - 命令行与环境变量配置
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

use std::path::PathBuf;

use clap::Args;
use url::Url;

/// 默认模型地址
pub const DEFAULT_MODEL_URL: &str = "yolov8:yolov8n.onnx";
/// 实时模式默认推理尺寸
pub const DEFAULT_LIVE_INPUT_SIZE: u32 = 416;
/// 转码默认超时（秒）
pub const DEFAULT_TRANSCODE_TIMEOUT_SECS: u64 = 300;

/// 两个命令共用的检测器与绘制参数
#[derive(Args, Debug, Clone)]
pub struct DetectorArgs {
  /// 模型地址，方案决定检测器后端（例如 yolov8:/models/yolov8n.onnx）
  #[arg(long, env = "SHOUWANG_MODEL", default_value = DEFAULT_MODEL_URL, value_name = "MODEL")]
  pub model: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.25, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.7, value_name = "THRESHOLD")]
  pub iou: f32,

  /// 标签字体（TrueType），未指定时使用内置字体
  #[arg(long, env = "SHOUWANG_FONT", value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 将检测框裁剪到画面范围内
  #[arg(long)]
  pub clamp_boxes: bool,
}

impl DetectorArgs {
  /// 合并阈值参数后的模型地址；地址中已显式给出的查询参数优先
  pub fn model_url(&self) -> Url {
    let mut url = self.model.clone();
    let present: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();

    {
      let mut pairs = url.query_pairs_mut();
      if !present.iter().any(|k| k == "confidence") {
        pairs.append_pair("confidence", &self.confidence.to_string());
      }
      if !present.iter().any(|k| k == "iou") {
        pairs.append_pair("iou", &self.iou.to_string());
      }
    }

    url
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(model: &str) -> DetectorArgs {
    DetectorArgs {
      model: Url::parse(model).unwrap(),
      confidence: 0.4,
      iou: 0.5,
      font: None,
      clamp_boxes: false,
    }
  }

  #[test]
  fn thresholds_are_appended() {
    let url = args("yolov8:/models/n.onnx").model_url();
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(url.path(), "/models/n.onnx");
    assert!(pairs.contains(&("confidence".to_string(), "0.4".to_string())));
    assert!(pairs.contains(&("iou".to_string(), "0.5".to_string())));
  }

  #[test]
  fn explicit_query_wins() {
    let url = args("yolov8:/models/n.onnx?confidence=0.9").model_url();
    let confidences: Vec<String> = url
      .query_pairs()
      .filter(|(k, _)| k == "confidence")
      .map(|(_, v)| v.into_owned())
      .collect();
    assert_eq!(confidences, vec!["0.9".to_string()]);
  }

  #[test]
  fn default_model_url_parses() {
    let url = Url::parse(DEFAULT_MODEL_URL).unwrap();
    assert_eq!(url.scheme(), "yolov8");
    assert_eq!(url.path(), "yolov8n.onnx");
  }
}
