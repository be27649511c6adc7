// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{DetectItem, DetectResult};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_PADDING: i32 = 2;
const PALETTE_SIZE: usize = 80;
/// 缩放系数 1.0 对应的字号（像素）
const PX_PER_SCALE: f32 = 30.0;

/// 常见系统字体位置
const SYSTEM_FONTS: [&str; 8] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "/Library/Fonts/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum FontError {
  #[error("读取字体文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(PathBuf),
}

pub fn load_font<P: AsRef<Path>>(path: P) -> Result<FontArc, FontError> {
  let path = path.as_ref();
  let data = std::fs::read(path)?;
  FontArc::try_from_vec(data).map_err(|_| FontError::InvalidFont(path.to_path_buf()))
}

/// 依次尝试常见的系统字体
pub fn find_font() -> Option<FontArc> {
  SYSTEM_FONTS.iter().find_map(|path| match load_font(path) {
    Ok(font) => {
      debug!("使用系统字体 {}", path);
      Some(font)
    }
    Err(_) => None,
  })
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(None)
  }
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    // 每个类别一种颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| hsv_to_rgb((i as f32 / PALETTE_SIZE as f32) * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      colors,
    }
  }

  /// 使用指定字体，未指定时搜索系统字体；都没有时只画框
  pub fn with_font_path(path: Option<&Path>) -> Result<Self, FontError> {
    let font = match path {
      Some(path) => {
        info!("加载字体 {}", path.display());
        Some(load_font(path)?)
      }
      None => find_font(),
    };
    if font.is_none() {
      warn!("未找到可用字体，将不绘制文字");
    }
    Ok(Self::new(font))
  }

  pub fn color_of(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  /// 在图像上绘制全部检测框和标签
  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult) {
    for item in result.items.iter() {
      let color = self.color_of(item.class_id);
      let Some(rect) = bbox_rect(image, &item.bbox) else {
        continue;
      };

      draw_hollow_rect_mut(image, rect, color);
      // 第二层边框以增加可见度
      if rect.width() > 2 && rect.height() > 2 {
        let inner = Rect::at(rect.left() + 1, rect.top() + 1)
          .of_size(rect.width() - 2, rect.height() - 2);
        draw_hollow_rect_mut(image, inner, color);
      }

      self.draw_label(image, rect, &label_text(result, item), color);
    }
  }

  fn draw_label(&self, image: &mut RgbImage, rect: Rect, label: &str, color: Rgb<u8>) {
    let Some(font) = &self.font else {
      return;
    };

    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, label);
    let label_h = text_h as i32 + 2 * LABEL_PADDING;
    let label_w = text_w + 2 * LABEL_PADDING as u32;

    // 标签放在框上方，空间不足时放在框内
    let label_y = if rect.top() >= label_h {
      rect.top() - label_h
    } else {
      rect.top()
    };

    draw_filled_rect_mut(
      image,
      Rect::at(rect.left(), label_y).of_size(label_w, label_h as u32),
      color,
    );
    draw_text_mut(
      image,
      Rgb([255, 255, 255]),
      rect.left() + LABEL_PADDING,
      label_y + LABEL_PADDING,
      scale,
      font,
      label,
    );
  }

  /// 以基线为原点绘制文字，`scale` 为相对字号（1.0 约 30 像素）。
  /// 没有字体时返回 false。
  pub fn draw_text(
    &self,
    image: &mut RgbImage,
    text: &str,
    x: i32,
    baseline: i32,
    scale: f32,
    color: Rgb<u8>,
  ) -> bool {
    let Some(font) = &self.font else {
      return false;
    };

    let px = PxScale::from(scale * PX_PER_SCALE);
    let ascent = font.as_scaled(px).ascent().round() as i32;
    draw_text_mut(image, color, x, baseline - ascent, px, font, text);
    true
  }
}

/// 标签文本，有跟踪编号时前置 `id:N`
pub fn label_text(result: &DetectResult, item: &DetectItem) -> String {
  match item.track_id {
    Some(id) => format!("id:{} {} {:.2}", id, result.label_of(item), item.score),
    None => format!("{} {:.2}", result.label_of(item), item.score),
  }
}

/// 像素坐标框裁剪到图像内，退化的框返回 None
fn bbox_rect(image: &RgbImage, bbox: &[f32; 4]) -> Option<Rect> {
  let (w, h) = (image.width() as i32, image.height() as i32);
  if w == 0 || h == 0 {
    return None;
  }

  let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
  let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
  let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
  let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

  if x_min >= x_max || y_min >= y_max {
    return None;
  }
  Some(Rect::at(x_min, y_min).of_size((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32))
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::model::Labels;

  fn result(items: Vec<DetectItem>) -> DetectResult {
    DetectResult::new(items, Arc::new(Labels::coco()))
  }

  #[test]
  fn hsv_primaries() {
    assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Rgb([255, 0, 0]));
    assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), Rgb([0, 255, 0]));
    assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), Rgb([0, 0, 255]));
  }

  #[test]
  fn palette_wraps_around() {
    let draw = Draw::default();
    assert_eq!(draw.color_of(3), draw.color_of(83));
    assert_ne!(draw.color_of(0), draw.color_of(40));
  }

  #[test]
  fn labels_include_track_ids() {
    let mut item = DetectItem::new(0, 0.876, [0.0; 4]);
    let r = result(vec![]);
    assert_eq!(label_text(&r, &item), "person 0.88");
    item.track_id = Some(7);
    assert_eq!(label_text(&r, &item), "id:7 person 0.88");
  }

  #[test]
  fn boxes_are_drawn_without_a_font() {
    let draw = Draw::default();
    let mut image = RgbImage::new(32, 32);
    draw.draw_detections(&mut image, &result(vec![DetectItem::new(2, 0.9, [4.0, 4.0, 20.0, 20.0])]));

    let color = draw.color_of(2);
    assert_eq!(*image.get_pixel(4, 10), color);
    assert_eq!(*image.get_pixel(10, 20), color);
    // 框内部不变
    assert_eq!(*image.get_pixel(12, 12), Rgb([0, 0, 0]));
    assert!(!draw.draw_text(&mut image, "x", 0, 10, 1.0, color));
  }

  #[test]
  fn text_sits_on_the_baseline() {
    // 需要系统字体
    let Some(font) = find_font() else {
      return;
    };
    let draw = Draw::new(Some(font));
    let mut image = RgbImage::new(200, 60);
    let baseline = 40;
    assert!(draw.draw_text(&mut image, "FPS", 10, baseline, 0.8, Rgb([255, 255, 255])));

    let rows: Vec<i32> = image
      .enumerate_pixels()
      .filter(|(_, _, p)| p.0 != [0, 0, 0])
      .map(|(_, y, _)| y as i32)
      .collect();
    assert!(!rows.is_empty());
    let (top, bottom) = (*rows.iter().min().unwrap(), *rows.iter().max().unwrap());
    // 大写字母无下伸部，底部贴近基线
    assert!(bottom <= baseline + 1, "bottom {}", bottom);
    assert!(bottom >= baseline - 4, "bottom {}", bottom);
    assert!(top >= baseline - (0.8 * PX_PER_SCALE) as i32, "top {}", top);
  }

  #[test]
  fn degenerate_and_outside_boxes_are_skipped() {
    let image = RgbImage::new(16, 16);
    assert!(bbox_rect(&image, &[5.0, 5.0, 5.0, 9.0]).is_none());
    assert!(bbox_rect(&image, &[20.0, 20.0, 30.0, 30.0]).is_none());
    let rect = bbox_rect(&image, &[-3.0, 2.0, 40.0, 8.0]).unwrap();
    assert_eq!((rect.left(), rect.top(), rect.width(), rect.height()), (0, 2, 16, 7));
  }

  #[test]
  fn missing_font_file_is_an_error() {
    assert!(matches!(
      Draw::with_font_path(Some(Path::new("/no/such/font.ttf"))),
      Err(FontError::IoError(_))
    ));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.ttf");
    std::fs::write(&path, b"not a font").unwrap();
    assert!(matches!(load_font(&path), Err(FontError::InvalidFont(_))));
  }
}
