// 该文件是 Shouwang （守望） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use tracing::{debug, error};

use super::InputError;

/// 读取并解码图像文件，统一转换为 RGB8
pub fn read_image(path: &Path) -> Result<RgbImage, InputError> {
  if !path.exists() {
    return Err(InputError::NotFound(path.to_path_buf()));
  }

  let decode_error = |reason: String| {
    error!("图像解码失败: {} ({})", path.display(), reason);
    InputError::Decode {
      path: path.to_path_buf(),
      reason,
    }
  };

  let image = ImageReader::open(path)?
    .with_guessed_format()?
    .decode()
    .map_err(|e| decode_error(e.to_string()))?
    .into_rgb8();

  if image.width() == 0 || image.height() == 0 {
    return Err(decode_error("图像尺寸为 0".to_string()));
  }

  debug!(
    "读取图像 {}: {}x{}",
    path.display(),
    image.width(),
    image.height()
  );

  Ok(image)
}
