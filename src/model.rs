// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/model.rs - 模型
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

use std::{fmt, str::FromStr, sync::Arc};

use thiserror::Error;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，帧像素坐标
  pub track_id: Option<u64>,
}

impl DetectItem {
  pub fn new(class_id: u32, score: f32, bbox: [f32; 4]) -> Self {
    Self {
      class_id,
      score,
      bbox,
      track_id: None,
    }
  }

  pub fn iou(&self, other: &DetectItem) -> f32 {
    iou(&self.bbox, &other.bbox)
  }
}

pub fn box_area(bbox: &[f32; 4]) -> f32 {
  (bbox[2] - bbox[0]).max(0.0) * (bbox[3] - bbox[1]).max(0.0)
}

/// 计算两个边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = box_area(a) + box_area(b) - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

#[derive(Debug, Clone)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
  pub labels: Arc<Labels>,
}

impl DetectResult {
  pub fn new(items: Vec<DetectItem>, labels: Arc<Labels>) -> Self {
    Self {
      items: items.into_boxed_slice(),
      labels,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn label_of(&self, item: &DetectItem) -> &str {
    self.labels.name(item.class_id)
  }

  /// 指定标签的检测数量
  pub fn count_label(&self, label: &str) -> usize {
    self
      .items
      .iter()
      .filter(|item| self.label_of(item) == label)
      .count()
  }
}

/// 推理设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  #[default]
  Cpu,
  Cuda(i32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("未知设备: {0}（可选 cpu、cuda、cuda:N）")]
pub struct ParseDeviceError(String);

impl FromStr for Device {
  type Err = ParseDeviceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_lowercase();
    match lower.as_str() {
      "cpu" => Ok(Device::Cpu),
      "cuda" | "gpu" => Ok(Device::Cuda(0)),
      other => {
        // 与 Ultralytics 一致，纯数字视为 GPU 编号
        let id = other.strip_prefix("cuda:").unwrap_or(other);
        id.parse::<i32>()
          .ok()
          .filter(|id| *id >= 0)
          .map(Device::Cuda)
          .ok_or_else(|| ParseDeviceError(s.to_string()))
      }
    }
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Cuda(id) => write!(f, "cuda:{}", id),
    }
  }
}

mod labels;
pub use self::labels::{COCO_CLASSES, Labels};

mod yolo;
pub use self::yolo::{Letterbox, OutputLayout, Yolo, YoloBuilder, YoloError, decode_output};

mod tracker;
pub use self::tracker::{IouTracker, Tracked};
