// 该文件是 Shouwang （守望） 项目的一部分。
// src/frame.rs - 帧与视频流属性定义
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

use image::RgbImage;

/// 视频源未报告帧率时使用的默认帧率
pub const DEFAULT_FPS: f64 = 20.0;

/// 解码后的一帧
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据（原始分辨率）
  pub image: RgbImage,
  /// 帧索引，从 0 开始
  pub index: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64) -> Self {
    Self { image, index }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 视频流属性
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProperties {
  pub width: u32,
  pub height: u32,
  /// 帧率，保证为正数
  pub fps: f64,
  /// 总帧数，流式来源可能为 0（未知）
  pub total_frames: u64,
}

impl VideoProperties {
  /// 构造属性；帧率为 0、负数或非有限值时回退到 [`DEFAULT_FPS`]
  pub fn new(width: u32, height: u32, fps: f64, total_frames: u64) -> Self {
    let fps = if fps.is_finite() && fps > 0.0 {
      fps
    } else {
      DEFAULT_FPS
    };

    Self {
      width,
      height,
      fps,
      total_frames,
    }
  }

  /// 按当前已处理帧数计算进度百分比，总帧数未知时返回 None
  pub fn progress_percent(&self, processed: u64) -> Option<f64> {
    if self.total_frames == 0 {
      None
    } else {
      Some(processed as f64 / self.total_frames as f64 * 100.0)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_fps_falls_back_to_default() {
    let props = VideoProperties::new(640, 480, 0.0, 100);
    assert_eq!(props.fps, DEFAULT_FPS);

    let props = VideoProperties::new(640, 480, f64::NAN, 100);
    assert_eq!(props.fps, DEFAULT_FPS);

    let props = VideoProperties::new(640, 480, 29.97, 100);
    assert_eq!(props.fps, 29.97);
  }

  #[test]
  fn progress_unknown_for_streams() {
    let props = VideoProperties::new(640, 480, 30.0, 0);
    assert_eq!(props.progress_percent(30), None);

    let props = VideoProperties::new(640, 480, 30.0, 120);
    assert_eq!(props.progress_percent(30), Some(25.0));
  }
}
