// 该文件是 Shouwang （守望） 项目的一部分。
// src/classify.rs - 检测结果分类
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

use serde::Serialize;

use crate::{
  model::{RawDetection, class_name},
  normalize::{PixelBox, Scale, normalize},
};

/// 人类类别编号（COCO: person）
pub const HUMAN_CLASS_IDS: [i64; 1] = [0];
/// 宠物类别编号（COCO: cat, dog）
pub const PET_CLASS_IDS: [i64; 2] = [15, 16];

/// 保留下来的检测类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
  Human,
  Pet,
}

/// 分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
  Human,
  Pet,
  Ignored,
}

impl Classification {
  /// 忽略的类别返回 None
  pub fn category(self) -> Option<Category> {
    match self {
      Classification::Human => Some(Category::Human),
      Classification::Pet => Some(Category::Pet),
      Classification::Ignored => None,
    }
  }
}

/// 类别编号分类；人类优先于宠物判断，其余一律忽略
pub fn classify(class_id: i64) -> Classification {
  if HUMAN_CLASS_IDS.contains(&class_id) {
    Classification::Human
  } else if PET_CLASS_IDS.contains(&class_id) {
    Classification::Pet
  } else {
    Classification::Ignored
  }
}

/// 分类后的检测结果，坐标已映射回原始帧像素空间
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedDetection {
  pub category: Category,
  pub label: &'static str,
  pub confidence: f32,
  pub class_id: u32,
  pub bbox: PixelBox,
}

/// 单帧统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameResult {
  pub human_count: usize,
  pub pet_count: usize,
  pub detections: Vec<ClassifiedDetection>,
}

impl FrameResult {
  /// 分类并映射坐标，忽略的检测不会出现在结果中；检测顺序保持不变
  pub fn from_raw(raw: &[RawDetection], scale: Scale) -> Self {
    let mut result = FrameResult::default();

    for det in raw {
      let Some(category) = classify(i64::from(det.class_id)).category() else {
        continue;
      };

      match category {
        Category::Human => result.human_count += 1,
        Category::Pet => result.pet_count += 1,
      }

      result.detections.push(ClassifiedDetection {
        category,
        label: class_name(det.class_id),
        confidence: det.confidence,
        class_id: det.class_id,
        bbox: normalize(det, scale),
      });
    }

    result
  }

  pub fn has_human(&self) -> bool {
    self.human_count > 0
  }

  pub fn has_pet(&self) -> bool {
    self.pet_count > 0
  }

  /// 画面摘要文本
  pub fn summary(&self) -> String {
    format!("Pets: {} | Humans: {}", self.pet_count, self.human_count)
  }

  /// 所有框裁剪到帧范围内
  pub fn clamp_to(&mut self, width: u32, height: u32) {
    for det in self.detections.iter_mut() {
      det.bbox = det.bbox.clamped(width, height);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classify_is_total() {
    for id in HUMAN_CLASS_IDS {
      assert_eq!(classify(id), Classification::Human);
    }
    for id in PET_CLASS_IDS {
      assert_eq!(classify(id), Classification::Pet);
    }
    for id in [-1, -16, 1, 2, 14, 17, 79, 80, 1000, i64::MIN, i64::MAX] {
      assert_eq!(classify(id), Classification::Ignored, "class id {id}");
    }
  }

  #[test]
  fn frame_result_drops_ignored_and_counts() {
    let raw = [
      RawDetection::new([10.0, 20.0, 30.0, 40.0], 0.9, 0),
      RawDetection::new([1.0, 1.0, 2.0, 2.0], 0.5, 2),
      RawDetection::new([50.0, 60.0, 70.0, 80.0], 0.8, 16),
      RawDetection::new([5.0, 5.0, 6.0, 6.0], 0.7, 15),
    ];

    let result = FrameResult::from_raw(&raw, Scale::IDENTITY);
    assert_eq!(result.human_count, 1);
    assert_eq!(result.pet_count, 2);
    assert_eq!(result.detections.len(), 3);
    assert_eq!(result.detections[0].label, "person");
    assert_eq!(result.detections[1].label, "dog");
    assert_eq!(result.detections[2].label, "cat");
    assert_eq!(result.detections[1].bbox, PixelBox::new(50, 60, 70, 80));
    assert_eq!(result.summary(), "Pets: 2 | Humans: 1");
  }

  #[test]
  fn empty_frame_summary() {
    let result = FrameResult::from_raw(&[], Scale::IDENTITY);
    assert!(!result.has_human());
    assert!(!result.has_pet());
    assert_eq!(result.summary(), "Pets: 0 | Humans: 0");
  }
}
