// 该文件是 Shouwang （守望） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出
//!
//! 逐帧写入时统一使用 MPEG-4 Part 2 编码（`avenc_mpeg4`，需要 gst-libav），
//! 容器由扩展名决定：
//!
//! - `.avi` - avimux
//! - `.mkv` - matroskamux
//! - 其他 - mp4mux
//!
//! 更高压缩率的 H.264 由写入完成后的转码步骤负责，见 [`crate::output::transcode`]。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::output::{FrameSink, SinkError, SinkSpec};

const ENCODER_ELEMENT: &str = "avenc_mpeg4";
const FINISH_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("数据流错误: {0}")]
  FlowError(#[from] gst::FlowError),
  #[error("管道中找不到元素: {0}")]
  ElementNotFound(&'static str),
  #[error("管道错误: {0}")]
  PipelineError(String),
}

/// 按扩展名选择封装
pub fn muxer_for(path: &Path) -> &'static str {
  let ext = path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(str::to_ascii_lowercase);

  match ext.as_deref() {
    Some("avi") => "avimux",
    Some("mkv") => "matroskamux",
    _ => "mp4mux",
  }
}

/// GStreamer 编码管道
pub struct GStreamerVideoSink {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  info: gst_video::VideoInfo,
  fps: f64,
  frame_count: u64,
  finished: bool,
}

impl GStreamerVideoSink {
  pub fn create(spec: &SinkSpec) -> Result<Self, SinkError> {
    gst::init().map_err(GStreamerVideoOutputError::from)?;

    if gst::ElementFactory::find(ENCODER_ELEMENT).is_none() {
      return Err(SinkError::EncoderUnavailable(format!(
        "缺少 GStreamer 编码器 {}",
        ENCODER_ELEMENT
      )));
    }

    Ok(Self::build(spec)?)
  }

  fn build(spec: &SinkSpec) -> Result<Self, GStreamerVideoOutputError> {
    let framerate = gst::Fraction::approximate_f64(spec.fps)
      .unwrap_or_else(|| gst::Fraction::new(spec.fps.round().max(1.0) as i32, 1));

    let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, spec.width, spec.height)
      .fps(framerate)
      .build()?;

    let description = format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! {} ! {} ! filesink name=sink",
      ENCODER_ELEMENT,
      muxer_for(&spec.path)
    );
    info!("创建视频输出管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("无法创建管道".to_string()))?;

    let filesink = pipeline
      .by_name("sink")
      .ok_or(GStreamerVideoOutputError::ElementNotFound("filesink"))?;
    filesink.set_property("location", spec.path.to_string_lossy().to_string());

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::ElementNotFound("appsrc"))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::ElementNotFound("appsrc"))?;

    appsrc.set_caps(Some(&info.to_caps()?));
    appsrc.set_format(gst::Format::Time);
    appsrc.set_property("block", true);

    if let Err(e) = pipeline.set_state(gst::State::Playing) {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(e.into());
    }

    info!(
      "视频输出已初始化: {}x{} @ {:.2} fps -> {}",
      spec.width,
      spec.height,
      spec.fps,
      spec.path.display()
    );

    Ok(GStreamerVideoSink {
      pipeline,
      appsrc,
      info,
      fps: spec.fps,
      frame_count: 0,
      finished: false,
    })
  }

  fn push_frame(&mut self, frame: &RgbImage) -> Result<(), GStreamerVideoOutputError> {
    let stride = self.info.stride()[0] as usize;
    let row_bytes = self.info.width() as usize * 3;
    let mut data = vec![0u8; self.info.size()];
    for (row, chunk) in frame.as_raw().chunks_exact(row_bytes).enumerate() {
      let start = row * stride;
      data[start..start + row_bytes].copy_from_slice(chunk);
    }

    let pts = (self.frame_count as f64 * 1e9 / self.fps) as u64;
    let duration = (1e9 / self.fps) as u64;

    let mut buffer = gst::Buffer::from_mut_slice(data);
    {
      let buffer_ref = buffer.get_mut().ok_or_else(|| {
        GStreamerVideoOutputError::PipelineError("缓冲区不可写".to_string())
      })?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration));
    }

    self.appsrc.push_buffer(buffer)?;
    self.frame_count += 1;
    Ok(())
  }

  fn drain(&mut self) -> Result<(), GStreamerVideoOutputError> {
    self.appsrc.end_of_stream()?;

    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("管道没有消息总线".to_string()))?;
    let message = bus.timed_pop_filtered(
      gst::ClockTime::from_seconds(FINISH_TIMEOUT_SECS),
      &[gst::MessageType::Eos, gst::MessageType::Error],
    );

    let outcome = match message.as_ref().map(|m| m.view()) {
      Some(gst::MessageView::Eos(..)) => Ok(()),
      Some(gst::MessageView::Error(err)) => Err(GStreamerVideoOutputError::PipelineError(
        err.error().to_string(),
      )),
      _ => Err(GStreamerVideoOutputError::PipelineError(
        "等待编码结束超时".to_string(),
      )),
    };

    self.pipeline.set_state(gst::State::Null)?;
    outcome
  }
}

impl FrameSink for GStreamerVideoSink {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
    if self.finished {
      return Err(SinkError::Closed);
    }

    let expected = (self.info.width(), self.info.height());
    if frame.dimensions() != expected {
      return Err(SinkError::FrameSizeMismatch {
        expected,
        actual: frame.dimensions(),
      });
    }

    Ok(self.push_frame(frame)?)
  }

  fn finish(&mut self) -> Result<(), SinkError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    self.drain()?;
    info!("视频输出已关闭，共写入 {} 帧", self.frame_count);
    Ok(())
  }
}

impl Drop for GStreamerVideoSink {
  fn drop(&mut self) {
    if self.finished {
      return;
    }
    self.finished = true;

    if let Err(e) = self.drain() {
      warn!("关闭 GStreamer 视频输出失败: {}", e);
      let _ = self.pipeline.set_state(gst::State::Null);
    }
  }
}
