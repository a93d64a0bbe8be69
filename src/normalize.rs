// 该文件是 Shouwang （守望） 项目的一部分。
// src/normalize.rs - 检测坐标映射
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

use image::{RgbImage, imageops::FilterType};
use serde::Serialize;

use crate::model::RawDetection;

/// 实时模式的缩小倍数
pub const LIVE_DOWNSCALE_FACTOR: u32 = 2;

/// 原始帧像素空间中的整数框 `[x1, y1, x2, y2]`，不保证位于帧内
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "[i32; 4]")]
pub struct PixelBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl From<PixelBox> for [i32; 4] {
  fn from(b: PixelBox) -> Self {
    [b.x1, b.y1, b.x2, b.y2]
  }
}

impl PixelBox {
  pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  /// 裁剪到 `[0, width - 1] x [0, height - 1]`
  pub fn clamped(self, width: u32, height: u32) -> Self {
    let max_x = width.saturating_sub(1) as i32;
    let max_y = height.saturating_sub(1) as i32;
    Self {
      x1: self.x1.clamp(0, max_x),
      y1: self.y1.clamp(0, max_y),
      x2: self.x2.clamp(0, max_x),
      y2: self.y2.clamp(0, max_y),
    }
  }
}

/// 检测器输入空间到原始帧空间的缩放系数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
  pub x: f32,
  pub y: f32,
}

impl Scale {
  pub const IDENTITY: Scale = Scale { x: 1.0, y: 1.0 };

  pub fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }
}

/// 坐标映射，结果向零截断取整，不做边界裁剪
pub fn normalize(raw: &RawDetection, scale: Scale) -> PixelBox {
  PixelBox {
    x1: (raw.x1 * scale.x) as i32,
    y1: (raw.y1 * scale.y) as i32,
    x2: (raw.x2 * scale.x) as i32,
    y2: (raw.y2 * scale.y) as i32,
  }
}

/// 实时模式的缩小方案：检测在缩小后的帧上运行，结果再放大回原尺寸
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveDownscale {
  pub width: u32,
  pub height: u32,
  pub scale: Scale,
}

impl LiveDownscale {
  /// 宽高各自整除缩小倍数，至少保留 1 像素
  pub fn for_frame(width: u32, height: u32) -> Self {
    let small_w = (width / LIVE_DOWNSCALE_FACTOR).max(1);
    let small_h = (height / LIVE_DOWNSCALE_FACTOR).max(1);
    Self {
      width: small_w,
      height: small_h,
      scale: Scale::new(
        width as f32 / small_w as f32,
        height as f32 / small_h as f32,
      ),
    }
  }

  /// 生成缩小后的帧（双线性插值）
  pub fn apply(&self, image: &RgbImage) -> RgbImage {
    image::imageops::resize(image, self.width, self.height, FilterType::Triangle)
  }
}
