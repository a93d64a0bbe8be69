// 该文件是 Shouwang （守望） 项目的一部分。
// src/bin/detect_live.rs - 实时单帧检测
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

//! 标准输出只打印一行 JSON，日志全部写到标准错误。

use std::{path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::{Parser, error::ErrorKind};
use tracing::error;

use shouwang::{
  FromUrl,
  config::{DEFAULT_LIVE_INPUT_SIZE, DetectorArgs},
  model::ModelWrapper,
  output::{
    draw::Draw,
    report::{LiveReport, error_json},
  },
  pipeline::{MediaPipeline, PipelineError},
};

const USAGE: &str = "Usage: detect-live <frame_path>";
const UNREADABLE_FRAME: &str = "Could not read frame";

/// 检测单帧图像中的人与宠物，原地覆盖为标注结果并输出 JSON
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,

  /// 帧图像文件，处理后被覆盖
  #[arg(value_name = "FRAME")]
  pub frame: PathBuf,

  /// 推理输入尺寸
  #[arg(long, default_value_t = DEFAULT_LIVE_INPUT_SIZE, value_name = "SIZE")]
  pub live_input_size: u32,
}

fn run(args: &Args) -> Result<LiveReport> {
  let model_url = args.detector.model_url();
  let draw = Draw::load(args.detector.font.as_deref());

  let mut pipeline = MediaPipeline::load(|| ModelWrapper::from_url(&model_url), draw)?
    .clamp_boxes(args.detector.clamp_boxes)
    .live_input_size(args.live_input_size);

  Ok(pipeline.process_live_frame(&args.frame)?)
}

fn error_message(err: &anyhow::Error) -> String {
  match err.downcast_ref::<PipelineError>() {
    Some(PipelineError::InputNotFound(_)) | Some(PipelineError::Decode(_)) => {
      UNREADABLE_FRAME.to_string()
    }
    _ => err.to_string(),
  }
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .init();

  let args = match Args::try_parse() {
    Ok(args) => args,
    Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
    Err(e) => {
      error!("{}", e);
      println!("{}", error_json(USAGE));
      return ExitCode::FAILURE;
    }
  };

  match run(&args).and_then(|report| Ok(report.to_json()?)) {
    Ok(json) => {
      println!("{}", json);
      ExitCode::SUCCESS
    }
    Err(e) => {
      error!("{:?}", e);
      println!("{}", error_json(&error_message(&e)));
      ExitCode::FAILURE
    }
  }
}
