// 该文件是 Shouwang （守望） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频文件输入
//!
//! 使用 `decodebin` 解码任意容器/编码的视频文件，逐帧输出 RGB 图像。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-libav
//! ```
//!
//! 打开时管道先进入 PAUSED 状态完成预滚，从协商好的 caps 中读取宽高与帧率，
//! 并通过时长查询估算总帧数（未知时为 0）。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  frame::{Frame, VideoProperties},
  input::{FrameSource, InputError},
};

/// 预滚等待上限
const PREROLL_TIMEOUT_SECS: u64 = 30;

const PIPELINE_DESCRIPTION: &str =
  "filesrc name=src ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false";

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("管道中找不到元素: {0}")]
  ElementNotFound(&'static str),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

/// 基于 GStreamer 的视频文件帧来源
pub struct GStreamerVideoSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  properties: VideoProperties,
  next_index: u64,
  finished: bool,
}

impl GStreamerVideoSource {
  pub fn open(path: &Path) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let pipeline = gst::parse::launch(PIPELINE_DESCRIPTION)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let filesrc = pipeline
      .by_name("src")
      .ok_or(GStreamerInputError::ElementNotFound("filesrc"))?;
    filesrc.set_property("location", path.to_string_lossy().to_string());

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::ElementNotFound("appsink"))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::ElementNotFound("appsink"))?;

    info!("打开视频文件: {}", path.display());

    let mut source = GStreamerVideoSource {
      pipeline,
      appsink,
      properties: VideoProperties::new(0, 0, 0.0, 0),
      next_index: 0,
      finished: false,
    };
    // 失败时 Drop 负责把管道置回 NULL
    source.properties = source.preroll()?;
    source.pipeline.set_state(gst::State::Playing)?;

    info!(
      "视频属性: {}x{} @ {:.2} fps, 共 {} 帧",
      source.properties.width,
      source.properties.height,
      source.properties.fps,
      source.properties.total_frames
    );

    Ok(source)
  }

  fn preroll(&self) -> Result<VideoProperties, GStreamerInputError> {
    self.pipeline.set_state(gst::State::Paused)?;
    let (result, _, _) = self
      .pipeline
      .state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
    if let Err(e) = result {
      return Err(
        self
          .bus_error()
          .map(GStreamerInputError::PipelineError)
          .unwrap_or(GStreamerInputError::StateChangeError(e)),
      );
    }

    let sample = self.appsink.pull_preroll()?;
    let caps = sample
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("预滚样本缺少 caps".to_string()))?;
    let info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

    let framerate = info.fps();
    let fps = if framerate.denom() > 0 {
      framerate.numer() as f64 / framerate.denom() as f64
    } else {
      0.0
    };
    let properties = VideoProperties::new(info.width(), info.height(), fps, 0);

    let total_frames = self
      .pipeline
      .query_duration::<gst::ClockTime>()
      .map(|duration| (duration.nseconds() as f64 / 1e9 * properties.fps).round() as u64)
      .unwrap_or(0);

    Ok(VideoProperties {
      total_frames,
      ..properties
    })
  }

  fn bus_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(format!(
        "{} ({})",
        err.error(),
        err.debug().map(|d| d.to_string()).unwrap_or_default()
      )),
      _ => None,
    }
  }

  fn read_frame(&mut self) -> Option<Result<RgbImage, GStreamerInputError>> {
    match self.appsink.pull_sample() {
      Ok(sample) => Some(sample_to_image(&sample)),
      Err(_) if self.appsink.is_eos() => None,
      Err(e) => {
        let reason = self.bus_error().unwrap_or_else(|| e.to_string());
        error!("读取视频帧失败: {}", reason);
        Some(Err(GStreamerInputError::PipelineError(reason)))
      }
    }
  }
}

impl Iterator for GStreamerVideoSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.read_frame() {
      Some(Ok(image)) => {
        let frame = Frame::new(image, self.next_index);
        self.next_index += 1;
        Some(Ok(frame))
      }
      Some(Err(e)) => {
        self.finished = true;
        Some(Err(InputError::from(e)))
      }
      None => {
        self.finished = true;
        None
      }
    }
  }
}

impl FrameSource for GStreamerVideoSource {
  fn properties(&self) -> VideoProperties {
    self.properties
  }
}

impl Drop for GStreamerVideoSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 输入管道失败: {}", e);
    }
  }
}

/// 按行拷贝，跳过行尾的 stride 填充
fn sample_to_image(sample: &gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;
  let info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  if info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat(info.format()));
  }

  let width = info.width() as usize;
  let height = info.height() as usize;
  let stride = info.stride()[0] as usize;
  let row_bytes = width * 3;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = stride * height.saturating_sub(1) + row_bytes;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_bytes * height);
  for row in 0..height {
    let start = row * stride;
    pixels.extend_from_slice(&data[start..start + row_bytes]);
  }

  RgbImage::from_raw(info.width(), info.height(), pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row_bytes * height,
      actual: data.len(),
    },
  )
}
