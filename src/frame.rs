// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/frame.rs - 帧定义
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

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// 将帧缩放到最长边不超过 `max_side`，保持宽高比
  pub fn fit_within(self, max_side: u32) -> Self {
    Self {
      image: fit_within(self.image, max_side),
      ..self
    }
  }
}

/// 计算最长边不超过 `max_side` 时的目标尺寸，`max_side == 0` 表示不缩放
pub fn fitted_dimensions(width: u32, height: u32, max_side: u32) -> (u32, u32) {
  let longest = width.max(height);
  if max_side == 0 || longest <= max_side {
    return (width, height);
  }

  let scale = max_side as f64 / longest as f64;
  let new_w = ((width as f64 * scale) as u32).max(1);
  let new_h = ((height as f64 * scale) as u32).max(1);
  (new_w, new_h)
}

/// 缩小图像，仅在超过最大边长时缩放
pub fn fit_within(image: RgbImage, max_side: u32) -> RgbImage {
  let (width, height) = image.dimensions();
  let (new_w, new_h) = fitted_dimensions(width, height, max_side);
  if (new_w, new_h) == (width, height) {
    return image;
  }
  image::imageops::resize(&image, new_w, new_h, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn small_frames_are_left_alone() {
    assert_eq!(fitted_dimensions(320, 240, 640), (320, 240));
    assert_eq!(fitted_dimensions(640, 480, 640), (640, 480));
  }

  #[test]
  fn zero_disables_resize() {
    assert_eq!(fitted_dimensions(1920, 1080, 0), (1920, 1080));
  }

  #[test]
  fn landscape_is_scaled_by_width() {
    assert_eq!(fitted_dimensions(1280, 720, 640), (640, 360));
    assert_eq!(fitted_dimensions(1920, 1080, 640), (640, 360));
  }

  #[test]
  fn portrait_is_scaled_by_height() {
    assert_eq!(fitted_dimensions(720, 1280, 640), (360, 640));
  }

  #[test]
  fn aspect_ratio_is_preserved() {
    let (w, h) = fitted_dimensions(1000, 750, 640);
    assert_eq!(w, 640);
    assert_eq!(h, 480);
    let before = 1000.0 / 750.0;
    let after = w as f64 / h as f64;
    assert!((before - after).abs() < 0.01);
  }

  #[test]
  fn extreme_aspect_never_collapses() {
    assert_eq!(fitted_dimensions(4000, 2, 640), (640, 1));
  }

  #[test]
  fn frame_resize_keeps_metadata() {
    let frame = Frame::new(RgbImage::new(1280, 960), 7, 280);
    let frame = frame.fit_within(640);
    assert_eq!((frame.width(), frame.height()), (640, 480));
    assert_eq!(frame.index, 7);
    assert_eq!(frame.timestamp_ms, 280);
  }
}
