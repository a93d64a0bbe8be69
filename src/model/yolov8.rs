// 该文件是 Shouwang （守望） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 检测器
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

//! 基于 tract 的 YOLOv8 检测器
//!
//! 模型为 ultralytics 导出的 ONNX 文件，输出形状 `[1, 4 + 类别数, N]`，
//! 每列依次为 `cx, cy, w, h` 与各类别得分。
//!
//! # URL 格式
//!
//! - `yolov8:yolov8n.onnx` - 相对路径
//! - `yolov8:///models/yolov8n.onnx?confidence=0.25&iou=0.7&size=640` - 绝对路径并指定参数

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detector, RawDetection},
};

const YOLOV8_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLOV8_STRIDE: u32 = 32;
const YOLOV8_DEFAULT_CONFIDENCE: f32 = 0.25;
const YOLOV8_DEFAULT_IOU: f32 = 0.7;
const YOLOV8_MAX_DETECTIONS: usize = 300;
const YOLOV8_PAD_VALUE: u8 = 114;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("输入图像为空")]
  EmptyImage,
}

impl From<std::io::Error> for Yolov8Error {
  fn from(err: std::io::Error) -> Self {
    Yolov8Error::ModelLoadError(err)
  }
}

impl Yolov8Error {
  pub fn invalid(msg: &str, e: TractError) -> Self {
    Yolov8Error::ModelInvalid(msg.to_string(), format!("{e:#}"))
  }

  fn inference(e: TractError) -> Self {
    Yolov8Error::InferenceError(format!("{e:#}"))
  }
}

pub struct Yolov8Builder {
  model_path: String,
  input_size: u32,
  confidence: f32,
  iou: f32,
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = "yolov8";
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    if url.path().is_empty() {
      return Err(Yolov8Error::ModelPathError("模型路径为空".to_string()));
    }

    let mut builder = Yolov8Builder {
      model_path: url.path().to_string(),
      input_size: YOLOV8_DEFAULT_INPUT_SIZE,
      confidence: YOLOV8_DEFAULT_CONFIDENCE,
      iou: YOLOV8_DEFAULT_IOU,
    };

    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "confidence" => {
          if let Ok(value) = v.parse() {
            builder = builder.confidence(value);
          }
        }
        "iou" => {
          if let Ok(value) = v.parse() {
            builder = builder.iou(value);
          }
        }
        "size" => {
          if let Ok(value) = v.parse() {
            builder = builder.input_size(value);
          }
        }
        _ => debug!("忽略未知的模型参数: {}", k),
      }
    }

    Ok(builder)
  }
}

impl Yolov8Builder {
  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence.clamp(0.0, 1.0);
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.iou = iou.clamp(0.0, 1.0);
    self
  }

  pub fn input_size(mut self, size: u32) -> Self {
    self.input_size = align_input_size(size);
    self
  }

  pub fn build(self) -> Result<Yolov8, Yolov8Error> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let model = tract_onnx::onnx()
      .model_for_read(&mut model_data.as_slice())
      .map_err(|e| Yolov8Error::invalid("无法解析 ONNX 模型", e))?;

    let num_inputs = model.inputs.len();
    let num_outputs = model.outputs.len();
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);
    if num_inputs != 1 || num_outputs == 0 {
      return Err(Yolov8Error::ModelInvalid(
        format!(
          "预期 1 个输入和至少 1 个输出, 实际为 {} / {}",
          num_inputs, num_outputs
        ),
        String::new(),
      ));
    }

    let detector = Yolov8 {
      model,
      plans: Mutex::new(HashMap::new()),
      input_size: self.input_size,
      confidence: self.confidence,
      iou: self.iou,
    };

    // 预先构建默认尺寸的推理计划，模型问题在加载阶段即可暴露
    detector.plan(detector.input_size)?;
    info!("模型加载完成");

    Ok(detector)
  }
}

pub struct Yolov8 {
  model: InferenceModel,
  plans: Mutex<HashMap<u32, Arc<Plan>>>,
  input_size: u32,
  confidence: f32,
  iou: f32,
}

/// 向上取整到步长的整数倍
fn align_input_size(size: u32) -> u32 {
  size.max(YOLOV8_STRIDE).div_ceil(YOLOV8_STRIDE) * YOLOV8_STRIDE
}

/// 信箱缩放参数：模型输入坐标 = 原图坐标 * ratio + pad
#[derive(Debug, Clone, Copy)]
struct Letterbox {
  ratio: f32,
  pad_x: f32,
  pad_y: f32,
}

impl Yolov8 {
  fn plan(&self, size: u32) -> Result<Arc<Plan>, Yolov8Error> {
    let mut plans = self
      .plans
      .lock()
      .map_err(|_| Yolov8Error::InferenceError("推理计划缓存已损坏".to_string()))?;

    if let Some(plan) = plans.get(&size) {
      return Ok(plan.clone());
    }

    info!("构建 {}x{} 推理计划", size, size);
    let plan = self
      .model
      .clone()
      .with_input_fact(
        0,
        InferenceFact::dt_shape(
          f32::datum_type(),
          tvec!(1, 3, size as usize, size as usize),
        ),
      )
      .map_err(|e| Yolov8Error::invalid("无法设置输入形状", e))?
      .into_optimized()
      .map_err(|e| Yolov8Error::invalid("无法优化模型", e))?
      .into_runnable()
      .map_err(|e| Yolov8Error::invalid("无法构建推理计划", e))?;

    let plan = Arc::new(plan);
    plans.insert(size, plan.clone());
    Ok(plan)
  }

  fn preprocess(image: &RgbImage, size: u32) -> (Tensor, Letterbox) {
    let (w, h) = image.dimensions();
    let ratio = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * ratio).round() as u32).clamp(1, size);
    let new_h = ((h as f32 * ratio).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([YOLOV8_PAD_VALUE; 3]));
    image::imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let size = size as usize;
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });

    (
      input.into_tensor(),
      Letterbox {
        ratio,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
      },
    )
  }

  fn postprocess(
    &self,
    output: &Tensor,
    letterbox: Letterbox,
    image_w: u32,
    image_h: u32,
  ) -> Result<Vec<RawDetection>, Yolov8Error> {
    let view = output
      .to_array_view::<f32>()
      .map_err(Yolov8Error::inference)?;
    let shape = view.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
      return Err(Yolov8Error::InferenceError(format!(
        "输出形状不符合预期: {:?}",
        shape
      )));
    }

    let features = shape[1];
    let anchors = shape[2];
    let view = view
      .into_dimensionality::<tract_ndarray::Ix3>()
      .map_err(|e| Yolov8Error::InferenceError(e.to_string()))?;
    let (max_x, max_y) = (image_w as f32, image_h as f32);
    let mut candidates = Vec::new();

    for i in 0..anchors {
      let (class_id, score) = (4..features)
        .map(|c| (c - 4, view[[0, c, i]]))
        .fold((0usize, f32::NEG_INFINITY), |best, cur| {
          if cur.1 > best.1 { cur } else { best }
        });

      if !score.is_finite() || score < self.confidence {
        continue;
      }

      let cx = view[[0, 0, i]];
      let cy = view[[0, 1, i]];
      let bw = view[[0, 2, i]];
      let bh = view[[0, 3, i]];

      let unletter = |v: f32, pad: f32| (v - pad) / letterbox.ratio;
      let bbox = [
        unletter(cx - bw / 2.0, letterbox.pad_x).clamp(0.0, max_x),
        unletter(cy - bh / 2.0, letterbox.pad_y).clamp(0.0, max_y),
        unletter(cx + bw / 2.0, letterbox.pad_x).clamp(0.0, max_x),
        unletter(cy + bh / 2.0, letterbox.pad_y).clamp(0.0, max_y),
      ];

      if bbox.iter().any(|v| !v.is_finite()) || bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
        continue;
      }

      candidates.push(RawDetection::new(bbox, score, class_id as u32));
    }

    debug!("置信度过滤后候选框: {}", candidates.len());
    Ok(non_max_suppression(candidates, self.iou))
  }
}

impl Detector for Yolov8 {
  type Error = Yolov8Error;

  fn detect(
    &self,
    image: &RgbImage,
    input_size: Option<u32>,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    if image.width() == 0 || image.height() == 0 {
      return Err(Yolov8Error::EmptyImage);
    }

    let size = input_size.map(align_input_size).unwrap_or(self.input_size);
    let plan = self.plan(size)?;

    debug!("预处理输入图像: {}x{} -> {}", image.width(), image.height(), size);
    let (input, letterbox) = Self::preprocess(image, size);

    debug!("执行模型推理");
    let outputs = plan
      .run(tvec!(input.into()))
      .map_err(Yolov8Error::inference)?;
    let output = outputs
      .first()
      .ok_or_else(|| Yolov8Error::InferenceError("模型没有输出".to_string()))?;

    let detections = self.postprocess(output, letterbox, image.width(), image.height())?;
    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }
}

fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
  let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
  let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
  let inter = inter_w * inter_h;
  let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
  let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
  let union = area_a + area_b - inter;
  if union > f32::EPSILON { inter / union } else { 0.0 }
}

/// 按类别分别进行非极大值抑制，结果按置信度降序排列
fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
  candidates.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<RawDetection> = Vec::new();
  for candidate in candidates {
    if kept.len() >= YOLOV8_MAX_DETECTIONS {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}
