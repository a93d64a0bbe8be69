// 该文件是 Shouwang （守望） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

//! 在原始帧上绘制检测框、标签和摘要信息。
//!
//! 各模式的绘制方案：
//!
//! | 模式 | 线宽 | 标签 | 叠加信息 |
//! |------|------|------|----------|
//! | 图像 | 3 | 类别色底 + 白字 | 左上角黄色摘要 |
//! | 视频 | 2 | 类别色文字，无底色 | 白色帧计数 + 白色摘要 |
//! | 实时 | 2 | 类别色底 + 白字 | 红色 LIVE 标记 + 白色摘要 |
//!
//! 框坐标不做裁剪，超出画面的部分由绘制函数自行截断。框的右、下边落在 `x2`、`y2` 上。
//!
//! 未指定字体时使用内置的 DejaVu Sans（`assets/font.ttf`）。

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size,
  },
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::classify::{Category, ClassifiedDetection, FrameResult};

pub const HUMAN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const PET_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const SUMMARY_IMAGE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const LIVE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const LABEL_PADDING: i32 = 3;
// 无字体时的字符宽度估计（相对字号）
const CHAR_WIDTH_RATIO: f32 = 0.55;
// 框坐标在画面外最多保留的距离，超出部分不可见
const OFFSCREEN_MARGIN: i32 = 1 << 16;

const EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf"); // default font

fn embedded_font() -> Option<FontArc> {
  match FontArc::try_from_slice(EMBEDDED_FONT) {
    Ok(font) => Some(font),
    Err(e) => {
      error!("无法加载内置字体: {}", e);
      None
    }
  }
}

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(PathBuf),
}

/// 绘制模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationMode {
  Image,
  Video { frame_index: u64, total_frames: u64 },
  Live,
}

struct Style {
  thickness: i32,
  label_size: f32,
  label_background: bool,
  summary_at: (i32, i32),
  summary_size: f32,
  summary_color: Rgb<u8>,
}

impl AnnotationMode {
  fn style(&self) -> Style {
    match self {
      AnnotationMode::Image => Style {
        thickness: 3,
        label_size: 22.0,
        label_background: true,
        summary_at: (10, 10),
        summary_size: 32.0,
        summary_color: SUMMARY_IMAGE_COLOR,
      },
      AnnotationMode::Video { .. } => Style {
        thickness: 2,
        label_size: 18.0,
        label_background: false,
        summary_at: (10, 40),
        summary_size: 24.0,
        summary_color: TEXT_COLOR,
      },
      AnnotationMode::Live => Style {
        thickness: 2,
        label_size: 18.0,
        label_background: true,
        summary_at: (10, 45),
        summary_size: 24.0,
        summary_color: TEXT_COLOR,
      },
    }
  }
}

pub fn category_color(category: Category) -> Rgb<u8> {
  match category {
    Category::Human => HUMAN_COLOR,
    Category::Pet => PET_COLOR,
  }
}

/// 标签文本
pub fn label_text(detection: &ClassifiedDetection) -> String {
  format!("{} {:.2}", detection.label, detection.confidence)
}

/// 检测结果绘制器；没有可用字体时只绘制框和标签底色
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(embedded_font())
  }
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    Self { font }
  }

  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font =
      FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.to_path_buf()))?;
    debug!("加载字体: {}", path.display());
    Ok(Self::new(Some(font)))
  }

  /// 优先使用指定字体，未指定或加载失败时使用内置字体
  pub fn load(font: Option<&Path>) -> Self {
    if let Some(path) = font {
      match Self::with_font_file(path) {
        Ok(draw) => return draw,
        Err(e) => warn!("无法加载字体 {}，改用内置字体: {}", path.display(), e),
      }
    }
    Self::default()
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 在帧上绘制全部检测结果与叠加信息，返回摘要文本
  pub fn annotate(
    &self,
    image: &mut RgbImage,
    result: &FrameResult,
    mode: &AnnotationMode,
  ) -> String {
    let style = mode.style();

    for detection in result.detections.iter() {
      self.draw_detection(image, detection, &style);
    }

    match *mode {
      AnnotationMode::Video {
        frame_index,
        total_frames,
      } => {
        let counter = format!("Frame: {}/{}", frame_index, total_frames);
        self.draw_text(image, &counter, (10, 10), style.summary_size, TEXT_COLOR);
      }
      AnnotationMode::Live => {
        draw_filled_circle_mut(image, (20, 20), 8, LIVE_COLOR);
        self.draw_text(image, "LIVE", (34, 8), style.summary_size, LIVE_COLOR);
      }
      AnnotationMode::Image => {}
    }

    let summary = result.summary();
    self.draw_text(
      image,
      &summary,
      style.summary_at,
      style.summary_size,
      style.summary_color,
    );
    summary
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &ClassifiedDetection, style: &Style) {
    let color = category_color(detection.category);
    let (max_x, max_y) = (
      (image.width() as i32).saturating_add(OFFSCREEN_MARGIN),
      (image.height() as i32).saturating_add(OFFSCREEN_MARGIN),
    );
    let clip_x = |v: i32| v.clamp(-OFFSCREEN_MARGIN, max_x);
    let clip_y = |v: i32| v.clamp(-OFFSCREEN_MARGIN, max_y);

    let bbox = detection.bbox;
    let left = clip_x(bbox.x1.min(bbox.x2));
    let top = clip_y(bbox.y1.min(bbox.y2));
    let width = clip_x(bbox.x1.max(bbox.x2)) - left;
    let height = clip_y(bbox.y1.max(bbox.y2)) - top;

    // 向内逐层绘制实现线宽，外层包含 x2、y2
    for i in 0..style.thickness {
      let (w, h) = (width - 2 * i, height - 2 * i);
      if w < 0 || h < 0 {
        break;
      }
      let rect = Rect::at(left + i, top + i).of_size(w as u32 + 1, h as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let label = label_text(detection);
    let (text_w, text_h) = self.text_extent(&label, style.label_size);
    let box_w = text_w + 2 * LABEL_PADDING;
    let box_h = text_h + 2 * LABEL_PADDING;
    let label_x = left;
    let label_y = (top - box_h).max(0);

    if style.label_background {
      let rect = Rect::at(label_x, label_y).of_size(box_w as u32, box_h as u32);
      draw_filled_rect_mut(image, rect, color);
      self.draw_text(
        image,
        &label,
        (label_x + LABEL_PADDING, label_y + LABEL_PADDING),
        style.label_size,
        TEXT_COLOR,
      );
    } else {
      self.draw_text(
        image,
        &label,
        (label_x + LABEL_PADDING, label_y + LABEL_PADDING),
        style.label_size,
        color,
      );
    }
  }

  fn text_extent(&self, text: &str, size: f32) -> (i32, i32) {
    match self.font {
      Some(ref font) => {
        let (w, h) = text_size(PxScale::from(size), font, text);
        (w as i32, (h as i32).max(1))
      }
      None => {
        let w = text.chars().count() as f32 * size * CHAR_WIDTH_RATIO;
        (w.ceil() as i32, size.ceil() as i32)
      }
    }
  }

  fn draw_text(&self, image: &mut RgbImage, text: &str, at: (i32, i32), size: f32, color: Rgb<u8>) {
    if let Some(ref font) = self.font {
      draw_text_mut(image, color, at.0, at.1, PxScale::from(size), font, text);
    }
  }
}
