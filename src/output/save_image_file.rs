// 该文件是 Shouwang （守望） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::Path;

use image::RgbImage;
use thiserror::Error;
use tracing::info;

use super::ensure_parent_dir;

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 按扩展名选择编码格式保存图像，必要时创建父目录
pub fn save_image(image: &RgbImage, path: &Path) -> Result<(), SaveImageFileError> {
  ensure_parent_dir(path)?;
  image.save(path)?;
  info!("保存图像到文件: {}", path.display());
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/deeper/out.png");
    save_image(&RgbImage::new(4, 4), &path).unwrap();
    assert!(path.exists());
  }

  #[test]
  fn unknown_extension_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.unknownformat");
    assert!(matches!(
      save_image(&RgbImage::new(4, 4), &path),
      Err(SaveImageFileError::ImageError(_))
    ));
  }
}
