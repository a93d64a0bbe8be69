// 该文件是 Shouwang （守望） 项目的一部分。
// src/model.rs - 检测器接口
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
use thiserror::Error;
use url::Url;

use crate::FromUrl;

mod coco;
pub use self::coco::{COCO_CLASSES, UNKNOWN_LABEL, class_name};

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error};

/// 检测器的一次原始输出，坐标位于检测器输入图像的像素空间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  /// 置信度 [0, 1]
  pub confidence: f32,
  pub class_id: u32,
}

impl RawDetection {
  pub fn new(bbox: [f32; 4], confidence: f32, class_id: u32) -> Self {
    Self {
      x1: bbox[0],
      y1: bbox[1],
      x2: bbox[2],
      y2: bbox[3],
      confidence,
      class_id,
    }
  }
}

/// 目标检测器
///
/// 检测器除一次性的模型加载外不保留跨调用状态。`input_size` 是推理输入尺寸的
/// 提示（实时模式使用较小的尺寸），为 `None` 时使用检测器默认值。
pub trait Detector {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(
    &self,
    image: &RgbImage,
    input_size: Option<u32>,
  ) -> Result<Vec<RawDetection>, Self::Error>;
}

impl<D: Detector + ?Sized> Detector for &D {
  type Error = D::Error;

  fn detect(
    &self,
    image: &RgbImage,
    input_size: Option<u32>,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    (**self).detect(image, input_size)
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_yolov8")]
  #[error("YOLOv8 模型错误: {0}")]
  Yolov8Error(#[from] Yolov8Error),
  #[error("不支持的模型方案: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择的检测器
pub enum ModelWrapper {
  #[cfg(feature = "model_yolov8")]
  Yolov8(Yolov8),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_yolov8")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == Yolov8Builder::SCHEME {
        let model = Yolov8Builder::from_url(url)?.build()?;
        return Ok(ModelWrapper::Yolov8(model));
      }
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Detector for ModelWrapper {
  type Error = ModelError;

  #[allow(unused_variables)]
  fn detect(
    &self,
    image: &RgbImage,
    input_size: Option<u32>,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    match *self {
      #[cfg(feature = "model_yolov8")]
      ModelWrapper::Yolov8(ref model) => model.detect(image, input_size).map_err(ModelError::from),
    }
  }
}
