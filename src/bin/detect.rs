// 该文件是 Shouwang （守望） 项目的一部分。
// src/bin/detect.rs - 图像/视频批处理检测
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

use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use shouwang::{
  FromUrl,
  config::{DEFAULT_TRANSCODE_TIMEOUT_SECS, DetectorArgs},
  model::ModelWrapper,
  output::{draw::Draw, report::DetectionRecorder, transcode::Transcoder},
  pipeline::{MediaPipeline, PipelineError, RunSummary},
};

/// 检测图像或视频中的人与宠物，输出标注后的文件
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,

  /// 输入文件（图片: png/jpg/jpeg/gif/bmp，其余按视频处理）
  #[arg(value_name = "INPUT")]
  pub input: PathBuf,

  /// 输出文件
  #[arg(value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 跳过视频输出的 H.264 转码
  #[arg(long)]
  pub no_transcode: bool,

  /// 转码超时（秒）
  #[arg(long, default_value_t = DEFAULT_TRANSCODE_TIMEOUT_SECS, value_name = "SECS")]
  pub transcode_timeout: u64,

  /// 转码程序
  #[arg(long, default_value = "ffmpeg", value_name = "PROGRAM")]
  pub ffmpeg: String,

  /// 逐帧检测记录（JSON Lines）
  #[arg(long, value_name = "PATH")]
  pub record: Option<PathBuf>,
}

fn run(args: &Args) -> Result<RunSummary> {
  if !args.input.exists() {
    return Err(PipelineError::InputNotFound(args.input.clone()).into());
  }

  let model_url = args.detector.model_url();
  info!("模型地址: {}", model_url);
  info!("输入文件: {}", args.input.display());
  info!("输出文件: {}", args.output.display());

  let recorder = args
    .record
    .as_deref()
    .map(DetectionRecorder::create)
    .transpose()
    .context("无法创建检测记录文件")?;

  let transcoder = (!args.no_transcode).then(|| {
    Transcoder::new(args.ffmpeg.clone()).timeout(Duration::from_secs(args.transcode_timeout))
  });

  let draw = Draw::load(args.detector.font.as_deref());
  let mut pipeline = MediaPipeline::load(|| ModelWrapper::from_url(&model_url), draw)?
    .clamp_boxes(args.detector.clamp_boxes)
    .transcoder(transcoder)
    .recorder(recorder);

  let summary = pipeline.run(&args.input, &args.output)?;
  Ok(summary)
}

fn main() -> ExitCode {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  match run(&args) {
    Ok(summary) => {
      if summary.total_humans > 0 || summary.total_pets > 0 {
        info!(
          "共检测到 {} 人次、{} 只次宠物",
          summary.total_humans, summary.total_pets
        );
      }
      println!("Total frames: {}", summary.frames_processed);
      println!("Pet alerts: {}", summary.pet_alert_count);
      println!("Humans detected: {}", summary.human_frame_count);
      println!("Output saved: {}", summary.output_path.display());
      ExitCode::SUCCESS
    }
    Err(e) => {
      error!("{:?}", e);
      ExitCode::FAILURE
    }
  }
}
