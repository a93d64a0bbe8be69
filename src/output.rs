// 该文件是 Shouwang （守望） 项目的一部分。
// src/output.rs - 输出定义
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;

pub mod draw;
pub mod report;
pub mod transcode;

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, save_image};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutputError, GStreamerVideoSink};

#[derive(Error, Debug)]
pub enum SinkError {
  #[error("没有可用的视频编码器: {0}")]
  EncoderUnavailable(String),
  #[error("帧尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("视频输出已关闭")]
  Closed,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
}

/// 视频输出参数
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
  pub path: PathBuf,
  pub fps: f64,
  pub width: u32,
  pub height: u32,
}

/// 按写入顺序接收帧的视频输出，最后一帧之后必须调用 `finish`
pub trait FrameSink {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError>;

  fn finish(&mut self) -> Result<(), SinkError>;
}

/// 创建视频输出；返回错误时不会留下半成品文件
pub trait SinkFactory {
  type Sink: FrameSink;

  fn create_sink(&self, spec: &SinkSpec) -> Result<Self::Sink, SinkError>;
}

/// 按编译特性选择的视频输出
pub enum SinkWrapper {
  #[cfg(feature = "gstreamer_output")]
  GStreamer(GStreamerVideoSink),
}

impl FrameSink for SinkWrapper {
  #[allow(unused_variables)]
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
    match *self {
      #[cfg(feature = "gstreamer_output")]
      SinkWrapper::GStreamer(ref mut sink) => sink.write_frame(frame),
    }
  }

  fn finish(&mut self) -> Result<(), SinkError> {
    match *self {
      #[cfg(feature = "gstreamer_output")]
      SinkWrapper::GStreamer(ref mut sink) => sink.finish(),
    }
  }
}

/// 默认的视频输出工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct VideoSinkFactory;

impl SinkFactory for VideoSinkFactory {
  type Sink = SinkWrapper;

  fn create_sink(&self, spec: &SinkSpec) -> Result<Self::Sink, SinkError> {
    ensure_parent_dir(&spec.path)?;

    create_or_clean(&spec.path, || {
      #[cfg(feature = "gstreamer_output")]
      {
        let sink = GStreamerVideoSink::create(spec)?;
        return Ok(SinkWrapper::GStreamer(sink));
      }

      #[cfg(not(feature = "gstreamer_output"))]
      return Err(SinkError::EncoderUnavailable(
        "未启用视频编码后端（需要 gstreamer_output 特性）".to_string(),
      ));
    })
  }
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), std::io::Error> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  Ok(())
}

/// 创建输出；失败时删除本次创建留下的半成品文件，已存在的文件保持不动
pub(crate) fn create_or_clean<T>(
  path: &Path,
  create: impl FnOnce() -> Result<T, SinkError>,
) -> Result<T, SinkError> {
  let existed = path.exists();
  create().inspect_err(|_| {
    if !existed
      && path.exists()
      && let Err(e) = std::fs::remove_file(path)
    {
      tracing::warn!("无法删除未完成的输出文件 {}: {}", path.display(), e);
    }
  })
}
