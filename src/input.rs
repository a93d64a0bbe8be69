// 该文件是 Shouwang （守望） 项目的一部分。
// src/input.rs - 图像/视频输入
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

use thiserror::Error;

use crate::frame::{Frame, VideoProperties};

mod read_image_file;
pub use self::read_image_file::read_image;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInputError, GStreamerVideoSource};

/// 按图像处理的扩展名（不区分大小写），其余一律按视频处理
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "bmp"];

/// 输入类型，仅由扩展名决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
  Image,
  Video,
}

impl MediaKind {
  pub fn from_path(path: &Path) -> Self {
    let is_image = path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| {
        IMAGE_EXTENSIONS
          .iter()
          .any(|known| known.eq_ignore_ascii_case(ext))
      })
      .unwrap_or(false);

    if is_image {
      MediaKind::Image
    } else {
      MediaKind::Video
    }
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("输入文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("无法解码 {path}: {reason}")]
  Decode { path: PathBuf, reason: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 按顺序产出帧的视频来源，流结束时返回 `None`
pub trait FrameSource: Iterator<Item = Result<Frame, InputError>> {
  fn properties(&self) -> VideoProperties;
}

/// 打开视频来源
pub trait SourceOpener {
  type Source: FrameSource;

  fn open(&self, path: &Path) -> Result<Self::Source, InputError>;
}

/// 按编译特性选择的视频来源
pub enum SourceWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerVideoSource),
}

impl Iterator for SourceWrapper {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match *self {
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::GStreamer(ref mut source) => source.next(),
    }
  }
}

impl FrameSource for SourceWrapper {
  fn properties(&self) -> VideoProperties {
    match *self {
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::GStreamer(ref source) => source.properties(),
    }
  }
}

/// 默认的视频打开方式；未启用任何视频后端时所有视频都按解码失败处理
#[derive(Debug, Default, Clone, Copy)]
pub struct VideoSourceOpener;

impl SourceOpener for VideoSourceOpener {
  type Source = SourceWrapper;

  fn open(&self, path: &Path) -> Result<Self::Source, InputError> {
    if !path.exists() {
      return Err(InputError::NotFound(path.to_path_buf()));
    }

    #[cfg(feature = "gstreamer_input")]
    {
      let source = GStreamerVideoSource::open(path)?;
      return Ok(SourceWrapper::GStreamer(source));
    }

    #[cfg(not(feature = "gstreamer_input"))]
    return Err(InputError::Decode {
      path: path.to_path_buf(),
      reason: "未启用视频解码后端（需要 gstreamer_input 特性）".to_string(),
    });
  }
}
