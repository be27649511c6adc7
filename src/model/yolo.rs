// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/model/yolo.rs - YOLO 模型（ONNX Runtime）
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

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::Arc,
};

use image::{RgbImage, imageops::FilterType};
use ndarray::{Array4, ArrayView2, ArrayView3, Axis};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::{Tensor, ValueType},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, Device, Labels, Model, iou},
};

pub const DEFAULT_IMAGE_SIZE: u32 = 640;
/// 与 Ultralytics 一致的单帧最大检测数
const MAX_DETECTIONS: usize = 300;
/// 填充像素值
const LETTERBOX_FILL: f32 = 114.0 / 255.0;
/// 端到端输出每行的长度：x1, y1, x2, y2, score, class
const END_TO_END_WIDTH: usize = 6;
const BOX_CHANNELS: usize = 4;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("Model not found: {0}")]
  ModelNotFound(PathBuf),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("张量形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
  #[error("模型没有输出")]
  NoOutput,
  #[error("不支持的输出形状: {0:?}")]
  UnsupportedOutput(Vec<i64>),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

pub struct YoloBuilder {
  model_path: PathBuf,
  device: Device,
  image_size: u32,
  confidence: f32,
  iou: f32,
}

impl YoloBuilder {
  pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      device: Device::Cpu,
      image_size: DEFAULT_IMAGE_SIZE,
      confidence: 0.25,
      iou: 0.7,
    }
  }

  pub fn device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  pub fn image_size(mut self, image_size: u32) -> Self {
    self.image_size = image_size;
    self
  }

  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn iou(mut self, iou: f32) -> Self {
    self.iou = iou;
    self
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    if !self.model_path.is_file() {
      return Err(YoloError::ModelNotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let session = self.session()?;

    let (input_w, input_h) = match static_input_size(&session) {
      Some(size) => {
        if size != (self.image_size, self.image_size) {
          warn!(
            "模型输入尺寸固定为 {}x{}，忽略 imgsz={}",
            size.0, size.1, self.image_size
          );
        }
        size
      }
      None => (self.image_size, self.image_size),
    };

    let labels = match session.metadata().and_then(|m| m.custom("names")) {
      Ok(Some(text)) => Labels::parse_metadata(&text).unwrap_or_else(|| {
        warn!("无法解析模型类别元数据，使用 COCO 类别");
        Labels::coco()
      }),
      Ok(None) => {
        debug!("模型没有类别元数据，使用 COCO 类别");
        Labels::coco()
      }
      Err(e) => {
        warn!("读取模型元数据失败: {}，使用 COCO 类别", e);
        Labels::coco()
      }
    };

    info!(
      "模型加载完成: 输入 {}x{}, {} 个类别, 设备 {}",
      input_w,
      input_h,
      labels.len(),
      self.device
    );

    Ok(Yolo {
      session,
      input_w,
      input_h,
      confidence: self.confidence,
      iou: self.iou,
      labels: Arc::new(labels),
    })
  }

  fn session(&self) -> Result<Session, YoloError> {
    let mut builder =
      Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    match self.device {
      Device::Cpu => {}
      #[cfg(feature = "cuda")]
      Device::Cuda(id) => {
        use ort::execution_providers::CUDAExecutionProvider;

        info!("使用 CUDA 设备 {}", id);
        builder = builder.with_execution_providers([CUDAExecutionProvider::default()
          .with_device_id(id)
          .build()])?;
      }
      #[cfg(not(feature = "cuda"))]
      Device::Cuda(id) => {
        warn!("未启用 cuda 特性，cuda:{} 回退到 CPU", id);
      }
    }

    Ok(builder.commit_from_file(&self.model_path)?)
  }
}

const YOLO_SCHEME: &str = "yolo";

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = YOLO_SCHEME;
}

/// `yolo:///path/model.onnx?conf=0.5&iou=0.45&imgsz=640&device=cuda:0`
impl FromUrl for YoloBuilder {
  type Error = YoloError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        YOLO_SCHEME
      )));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut builder = YoloBuilder::new(url.path());
    if let Some(conf) = query.get("conf").and_then(|v| v.parse().ok()) {
      builder = builder.confidence(conf);
    }
    if let Some(iou) = query.get("iou").and_then(|v| v.parse().ok()) {
      builder = builder.iou(iou);
    }
    if let Some(size) = query.get("imgsz").and_then(|v| v.parse().ok()) {
      builder = builder.image_size(size);
    }
    if let Some(device) = query.get("device") {
      builder = builder.device(
        device
          .parse()
          .map_err(|e: crate::model::ParseDeviceError| YoloError::ModelPathError(e.to_string()))?,
      );
    }
    Ok(builder)
  }
}

/// 读取固定的输入尺寸 (宽, 高)，动态维度返回 None
fn static_input_size(session: &Session) -> Option<(u32, u32)> {
  let input = session.inputs.first()?;
  match &input.input_type {
    ValueType::Tensor { shape, .. } if shape.len() == 4 => {
      let (h, w) = (shape[2], shape[3]);
      (h > 0 && w > 0).then_some((w as u32, h as u32))
    }
    _ => None,
  }
}

pub struct Yolo {
  session: Session,
  input_w: u32,
  input_h: u32,
  confidence: f32,
  iou: f32,
  labels: Arc<Labels>,
}

impl Yolo {
  pub fn labels(&self) -> &Arc<Labels> {
    &self.labels
  }
}

impl Model for Yolo {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = YoloError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let letterbox = Letterbox::new(input.width(), input.height(), self.input_w, self.input_h);
    let tensor = Tensor::from_array(letterbox.tensor(input))?;

    debug!("执行模型推理");
    let outputs = self.session.run(ort::inputs![tensor])?;
    let (_, output) = outputs.iter().next().ok_or(YoloError::NoOutput)?;
    let (shape, data) = output.try_extract_tensor::<f32>()?;
    let dims: Vec<i64> = shape.iter().copied().collect();

    let items = decode_output(
      &dims,
      data,
      self.labels.len(),
      self.confidence,
      self.iou,
      &letterbox,
    )?;
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult::new(items, self.labels.clone()))
  }
}

/// 保持宽高比缩放到模型输入，图像置于左上角，其余部分填充
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub ratio: f32,
  pub resized_w: u32,
  pub resized_h: u32,
  pub input_w: u32,
  pub input_h: u32,
  pub source_w: u32,
  pub source_h: u32,
}

impl Letterbox {
  pub fn new(source_w: u32, source_h: u32, input_w: u32, input_h: u32) -> Self {
    let ratio = (input_w as f32 / source_w.max(1) as f32).min(input_h as f32 / source_h.max(1) as f32);
    let resized_w = ((source_w as f32 * ratio).round() as u32).clamp(1, input_w);
    let resized_h = ((source_h as f32 * ratio).round() as u32).clamp(1, input_h);
    Self {
      ratio,
      resized_w,
      resized_h,
      input_w,
      input_h,
      source_w,
      source_h,
    }
  }

  /// 生成 NCHW、0..1 归一化的输入张量
  pub fn tensor(&self, image: &RgbImage) -> Array4<f32> {
    let mut input = Array4::from_elem(
      (1, 3, self.input_h as usize, self.input_w as usize),
      LETTERBOX_FILL,
    );

    let resized;
    let image = if image.dimensions() == (self.resized_w, self.resized_h) {
      image
    } else {
      resized = image::imageops::resize(image, self.resized_w, self.resized_h, FilterType::Triangle);
      &resized
    };

    for (x, y, pixel) in image.enumerate_pixels() {
      let (x, y) = (x as usize, y as usize);
      for c in 0..3 {
        input[[0, c, y, x]] = pixel[c] as f32 / 255.0;
      }
    }
    input
  }

  /// 模型坐标映射回原图并裁剪到图像范围
  pub fn to_source(&self, bbox: [f32; 4]) -> [f32; 4] {
    let w = self.source_w as f32;
    let h = self.source_h as f32;
    [
      (bbox[0] / self.ratio).clamp(0.0, w),
      (bbox[1] / self.ratio).clamp(0.0, h),
      (bbox[2] / self.ratio).clamp(0.0, w),
      (bbox[3] / self.ratio).clamp(0.0, h),
    ]
  }
}

/// 模型输出布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
  /// `[1, 4 + nc, N]`（YOLOv8/11），`transposed` 时为 `[1, N, 4 + nc]`
  Anchors {
    channels: usize,
    anchors: usize,
    transposed: bool,
  },
  /// `[1, K, 6]`（YOLOv10/26 端到端导出，已做过 NMS）
  EndToEnd { detections: usize },
}

impl OutputLayout {
  /// 按类别数 `num_classes` 确定类别所在的轴；类别数对不上时按维度大小推断
  pub fn detect(dims: &[i64], num_classes: usize) -> Result<Self, YoloError> {
    let unsupported = || YoloError::UnsupportedOutput(dims.to_vec());
    if dims.len() != 3 || dims[0] != 1 || dims.iter().any(|d| *d <= 0) {
      return Err(unsupported());
    }

    let (a, b) = (dims[1] as usize, dims[2] as usize);
    let channels = BOX_CHANNELS + num_classes;

    if num_classes > 0 && a == channels {
      return Ok(OutputLayout::Anchors {
        channels,
        anchors: b,
        transposed: false,
      });
    }
    // 两类模型的转置输出同样是 6 列，端到端输出不超过 MAX_DETECTIONS 行
    if b == END_TO_END_WIDTH && (channels != END_TO_END_WIDTH || a <= MAX_DETECTIONS) {
      return Ok(OutputLayout::EndToEnd { detections: a });
    }
    if num_classes > 0 && b == channels {
      return Ok(OutputLayout::Anchors {
        channels,
        anchors: a,
        transposed: true,
      });
    }

    debug!("输出形状 {:?} 与 {} 个类别不符，按维度大小推断", dims, num_classes);

    let (channels, anchors, transposed) = if a <= b { (a, b, false) } else { (b, a, true) };
    if channels <= BOX_CHANNELS {
      return Err(unsupported());
    }

    Ok(OutputLayout::Anchors {
      channels,
      anchors,
      transposed,
    })
  }
}

/// 解码模型输出为原图坐标下的检测结果
pub fn decode_output(
  dims: &[i64],
  data: &[f32],
  num_classes: usize,
  confidence: f32,
  iou_threshold: f32,
  letterbox: &Letterbox,
) -> Result<Vec<DetectItem>, YoloError> {
  let layout = OutputLayout::detect(dims, num_classes)?;
  debug!("输出布局: {:?}", layout);

  let mut items = match layout {
    OutputLayout::Anchors {
      channels,
      anchors,
      transposed,
    } => {
      let view = if transposed {
        ArrayView3::from_shape((1, anchors, channels), data)?
          .index_axis_move(Axis(0), 0)
          .reversed_axes()
      } else {
        ArrayView3::from_shape((1, channels, anchors), data)?.index_axis_move(Axis(0), 0)
      };
      let mut items = decode_anchors(view, confidence, letterbox);
      non_max_suppression(&mut items, iou_threshold);
      items
    }
    OutputLayout::EndToEnd { detections } => {
      let view = ArrayView3::from_shape((1, detections, END_TO_END_WIDTH), data)?
        .index_axis_move(Axis(0), 0);
      decode_end_to_end(view, confidence, letterbox)
    }
  };

  items.sort_by(|a, b| b.score.total_cmp(&a.score));
  items.truncate(MAX_DETECTIONS);
  Ok(items)
}

/// `view` 形状为 (4 + nc, N)
fn decode_anchors(view: ArrayView2<f32>, confidence: f32, letterbox: &Letterbox) -> Vec<DetectItem> {
  let mut items = Vec::new();

  for pred in view.axis_iter(Axis(1)) {
    let (class_id, score) = pred
      .iter()
      .skip(BOX_CHANNELS)
      .enumerate()
      .fold((0usize, f32::MIN), |best, (i, &s)| if s > best.1 { (i, s) } else { best });

    if score < confidence {
      continue;
    }

    let (cx, cy, w, h) = (pred[0], pred[1], pred[2], pred[3]);
    let bbox = letterbox.to_source([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);
    items.push(DetectItem::new(class_id as u32, score, bbox));
  }

  items
}

/// `view` 形状为 (K, 6)
fn decode_end_to_end(view: ArrayView2<f32>, confidence: f32, letterbox: &Letterbox) -> Vec<DetectItem> {
  view
    .axis_iter(Axis(0))
    .filter(|row| row[4] >= confidence && row[5] >= 0.0)
    .map(|row| {
      let bbox = letterbox.to_source([row[0], row[1], row[2], row[3]]);
      DetectItem::new(row[5].round() as u32, row[4], bbox)
    })
    .collect()
}

/// 按类别的非极大值抑制
pub fn non_max_suppression(items: &mut Vec<DetectItem>, iou_threshold: f32) {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut current_index = 0;
  for index in 0..items.len() {
    let mut drop = false;
    for prev_index in 0..current_index {
      if items[prev_index].class_id == items[index].class_id
        && iou(&items[prev_index].bbox, &items[index].bbox) > iou_threshold
      {
        drop = true;
        break;
      }
    }
    if !drop {
      items.swap(current_index, index);
      current_index += 1;
    }
  }
  items.truncate(current_index);
}

#[cfg(test)]
mod tests {
  use super::*;

  fn identity() -> Letterbox {
    Letterbox::new(640, 640, 640, 640)
  }

  #[test]
  fn letterbox_keeps_aspect_ratio() {
    let lb = Letterbox::new(1280, 720, 640, 640);
    assert_eq!(lb.ratio, 0.5);
    assert_eq!((lb.resized_w, lb.resized_h), (640, 360));
  }

  #[test]
  fn letterbox_maps_back_to_source() {
    let lb = Letterbox::new(1280, 720, 640, 640);
    assert_eq!(lb.to_source([10.0, 20.0, 100.0, 200.0]), [20.0, 40.0, 200.0, 400.0]);
    // 填充区域内的坐标被裁剪
    assert_eq!(lb.to_source([0.0, 300.0, 700.0, 500.0]), [0.0, 600.0, 1280.0, 720.0]);
  }

  #[test]
  fn letterbox_tensor_pads_with_gray() {
    let image = RgbImage::from_pixel(4, 2, image::Rgb([255, 0, 0]));
    let lb = Letterbox::new(4, 2, 4, 4);
    let tensor = lb.tensor(&image);
    assert_eq!(tensor.shape(), &[1, 3, 4, 4]);
    assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
    assert_eq!(tensor[[0, 1, 1, 3]], 0.0);
    assert_eq!(tensor[[0, 0, 3, 0]], LETTERBOX_FILL);
  }

  #[test]
  fn detects_layouts() {
    assert_eq!(
      OutputLayout::detect(&[1, 84, 8400], 80).unwrap(),
      OutputLayout::Anchors {
        channels: 84,
        anchors: 8400,
        transposed: false
      }
    );
    assert_eq!(
      OutputLayout::detect(&[1, 8400, 7], 3).unwrap(),
      OutputLayout::Anchors {
        channels: 7,
        anchors: 8400,
        transposed: true
      }
    );
    assert_eq!(
      OutputLayout::detect(&[1, 300, 6], 80).unwrap(),
      OutputLayout::EndToEnd { detections: 300 }
    );
    assert!(OutputLayout::detect(&[1, 4, 8400], 0).is_err());
    assert!(OutputLayout::detect(&[2, 84, 8400], 80).is_err());
    assert!(OutputLayout::detect(&[84, 8400], 80).is_err());
  }

  #[test]
  fn class_count_picks_the_class_axis() {
    // 小输入尺寸下 anchor 数少于通道数
    assert_eq!(
      OutputLayout::detect(&[1, 84, 21], 80).unwrap(),
      OutputLayout::Anchors {
        channels: 84,
        anchors: 21,
        transposed: false
      }
    );
    // 两类模型的转置输出
    assert_eq!(
      OutputLayout::detect(&[1, 8400, 6], 2).unwrap(),
      OutputLayout::Anchors {
        channels: 6,
        anchors: 8400,
        transposed: true
      }
    );
    assert_eq!(
      OutputLayout::detect(&[1, 300, 6], 2).unwrap(),
      OutputLayout::EndToEnd { detections: 300 }
    );
    // 类别数对不上时按维度大小推断
    assert_eq!(
      OutputLayout::detect(&[1, 9, 8400], 80).unwrap(),
      OutputLayout::Anchors {
        channels: 9,
        anchors: 8400,
        transposed: false
      }
    );
  }

  #[test]
  fn decodes_small_anchor_count() {
    // [1, 4 + 80, 2]：anchor 数小于通道数时不转置
    let mut preds = vec![([100.0, 100.0, 20.0, 20.0], 5, 0.9)];
    preds.push(([10.0, 10.0, 4.0, 4.0], 79, 0.05));
    let (dims, data) = anchors_output(80, &preds);
    assert_eq!(dims, vec![1, 84, 2]);
    let items = decode_output(&dims, &data, 80, 0.25, 0.7, &identity()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 5);
    assert_eq!(items[0].bbox, [90.0, 90.0, 110.0, 110.0]);
  }

  /// 构造 [1, 4 + nc, N] 输出
  fn anchors_output(nc: usize, preds: &[([f32; 4], usize, f32)]) -> (Vec<i64>, Vec<f32>) {
    let channels = 4 + nc;
    let n = preds.len();
    let mut data = vec![0.0f32; channels * n];
    for (a, (cxcywh, class_id, score)) in preds.iter().enumerate() {
      for c in 0..4 {
        data[c * n + a] = cxcywh[c];
      }
      data[(4 + class_id) * n + a] = *score;
    }
    (vec![1, channels as i64, n as i64], data)
  }

  #[test]
  fn decodes_anchor_output_with_nms() {
    let (dims, data) = anchors_output(
      3,
      &[
        ([100.0, 100.0, 50.0, 50.0], 0, 0.9),
        // 与第一个框高度重叠，同类别，被抑制
        ([102.0, 101.0, 50.0, 50.0], 0, 0.8),
        // 同位置不同类别，保留
        ([100.0, 100.0, 50.0, 50.0], 2, 0.7),
        // 低于阈值
        ([300.0, 300.0, 20.0, 20.0], 1, 0.1),
      ],
    );

    let items = decode_output(&dims, &data, 3, 0.25, 0.7, &identity()).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].class_id, 0);
    assert_eq!(items[0].bbox, [75.0, 75.0, 125.0, 125.0]);
    assert!((items[0].score - 0.9).abs() < 1e-6);
    assert_eq!(items[1].class_id, 2);
  }

  #[test]
  fn decodes_transposed_anchor_output() {
    // [1, N, 4 + nc]，N = 8，nc = 3
    let channels = 7;
    let mut data = vec![0.0f32; 8 * channels];
    data[3 * channels..4 * channels].copy_from_slice(&[50.0, 50.0, 20.0, 20.0, 0.1, 0.6, 0.2]);

    let items = decode_output(&[1, 8, channels as i64], &data, 3, 0.5, 0.7, &identity()).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 1);
    assert_eq!(items[0].bbox, [40.0, 40.0, 60.0, 60.0]);
  }

  #[test]
  fn decodes_end_to_end_output() {
    let dims = [1, 3, 6];
    let data = [
      10.0, 20.0, 110.0, 220.0, 0.95, 4.0, //
      0.0, 0.0, 5.0, 5.0, 0.1, 1.0, //
      50.0, 60.0, 70.0, 80.0, 0.5, 2.0,
    ];
    let lb = Letterbox::new(1280, 1280, 640, 640);
    let items = decode_output(&dims, &data, 80, 0.25, 0.7, &lb).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].class_id, 4);
    assert_eq!(items[0].bbox, [20.0, 40.0, 220.0, 440.0]);
    assert_eq!(items[1].class_id, 2);
  }

  #[test]
  fn mismatched_data_is_an_error() {
    let dims = [1, 84, 8400];
    assert!(matches!(
      decode_output(&dims, &[0.0; 10], 80, 0.25, 0.7, &identity()),
      Err(YoloError::ShapeError(_))
    ));
  }

  #[test]
  fn nms_keeps_best_per_class() {
    let mut items = vec![
      DetectItem::new(0, 0.5, [0.0, 0.0, 10.0, 10.0]),
      DetectItem::new(0, 0.9, [1.0, 1.0, 11.0, 11.0]),
      DetectItem::new(1, 0.4, [0.0, 0.0, 10.0, 10.0]),
      DetectItem::new(0, 0.3, [50.0, 50.0, 60.0, 60.0]),
    ];
    non_max_suppression(&mut items, 0.5);
    let scores: Vec<f32> = items.iter().map(|i| i.score).collect();
    assert_eq!(scores, vec![0.9, 0.4, 0.3]);
  }

  #[test]
  fn missing_model_is_reported() {
    let err = YoloBuilder::new("/no/such/model.onnx").build().err().unwrap();
    assert!(matches!(err, YoloError::ModelNotFound(_)));
    assert_eq!(err.to_string(), "Model not found: /no/such/model.onnx");
  }

  #[test]
  fn builder_from_url() {
    let url = Url::parse("yolo:///models/bestn.onnx?conf=0.8&iou=0.3&device=cuda:1").unwrap();
    let builder = YoloBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/bestn.onnx"));
    assert_eq!(builder.confidence, 0.8);
    assert_eq!(builder.iou, 0.3);
    assert_eq!(builder.device, Device::Cuda(1));

    let url = Url::parse("onnx:///models/bestn.onnx").unwrap();
    assert!(YoloBuilder::from_url(&url).is_err());
  }
}
