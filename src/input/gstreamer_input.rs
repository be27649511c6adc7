// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 本模块提供基于 GStreamer 的视频输入功能，支持：
//! - 摄像头捕获（按索引选择平台对应的采集元素）
//! - 视频文件读取
//! - `gst://` URL 描述的摄像头/文件管道
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! **macOS:**
//! ```bash
//! brew install gstreamer
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use liaowang::input::GStreamerInputPipelineBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input = GStreamerInputPipelineBuilder::new()
//!     .camera_index(0)
//!     .target_format("RGB")
//!     .build()?;
//!
//! for frame in input {
//!     println!("帧 {}: {}x{}", frame.index, frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## URL 格式
//!
//! - `gst://camera/dev/video0?width=1280&height=720&fps=30&format=YUY2&rotate=90`
//! - `gst://camera/0` 按索引打开摄像头
//! - `gst://file/home/user/video.mp4?rotate=180`

use std::collections::HashMap;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

/// 等待管道进入播放状态的最长时间
const STATE_CHANGE_TIMEOUT_SECS: u64 = 10;
/// 按实时流处理的 URI 方案
const LIVE_SCHEMES: [&str; 5] = ["rtsp", "rtsps", "rtmp", "udp", "srt"];

/// 转义 parse::launch 引号内的属性值
fn escape_value(value: &str) -> String {
  let mut escaped = String::with_capacity(value.len());
  for ch in value.chars() {
    if ch == '\\' || ch == '"' {
      escaped.push('\\');
    }
    escaped.push(ch);
  }
  escaped
}

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format: {0}")]
  UnsupportedFormat(String),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 管道无法启动
  #[error("Pipeline failed to start: {0}")]
  StartFailed(String),
}

/// 摄像头采集后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraBackend {
  /// Linux V4L2
  V4l2,
  /// macOS AVFoundation
  AvFoundation,
  /// Windows Media Foundation
  MediaFoundation,
  /// 由 GStreamer 自动选择
  Auto,
}

impl CameraBackend {
  /// 当前平台的默认后端
  pub fn native() -> Self {
    if cfg!(target_os = "linux") {
      CameraBackend::V4l2
    } else if cfg!(target_os = "macos") {
      CameraBackend::AvFoundation
    } else if cfg!(target_os = "windows") {
      CameraBackend::MediaFoundation
    } else {
      CameraBackend::Auto
    }
  }

  fn element(&self, index: u32) -> String {
    match self {
      CameraBackend::V4l2 => format!("v4l2src device=/dev/video{}", index),
      CameraBackend::AvFoundation => format!("avfvideosrc device-index={}", index),
      CameraBackend::MediaFoundation => format!("mfvideosrc device-index={}", index),
      CameraBackend::Auto => {
        if index != 0 {
          warn!("autovideosrc 不支持摄像头索引 {}，使用默认设备", index);
        }
        "autovideosrc".to_string()
      }
    }
  }
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  UriSource {
    uri: String,
    live: bool,
  },
  CameraIndex {
    backend: CameraBackend,
    index: u32,
  },
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
    direction: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", escape_value(path))
      }
      GStreamerInputBuilderItem::UriSource { uri, .. } => {
        format!("uridecodebin uri=\"{}\"", escape_value(uri))
      }
      GStreamerInputBuilderItem::CameraIndex { backend, index } => backend.element(*index),
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = if let Some(mode) = io_mode {
          format!(" io-mode={}", mode)
        } else {
          "".to_string()
        };
        let mut caps = Vec::new();
        if let Some(format) = format {
          caps.push(format!("format={}", format));
        }
        if let Some(width) = width {
          caps.push(format!("width={}", width));
        }
        if let Some(height) = height {
          caps.push(format!("height={}", height));
        }
        if let Some(fps) = fps {
          caps.push(format!("framerate={}/1", fps));
        }
        if caps.is_empty() {
          format!("v4l2src device={}{}", camera, io_mode_str)
        } else {
          format!(
            "v4l2src device={}{} ! video/x-raw,{}",
            camera,
            io_mode_str,
            caps.join(",")
          )
        }
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method, direction } => {
        format!("videoflip method={} video-direction={}", method, direction)
      }
    }
  }

  fn is_live(&self) -> bool {
    matches!(
      self,
      GStreamerInputBuilderItem::CameraIndex { .. }
        | GStreamerInputBuilderItem::CameraSource { .. }
        | GStreamerInputBuilderItem::UriSource { live: true, .. }
    )
  }
}

/// GStreamer 输入管道构建器
///
/// # 示例
///
/// ```no_run
/// use liaowang::input::GStreamerInputPipelineBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let input = GStreamerInputPipelineBuilder::new()
///     .file("video.mp4")
///     .target_format("RGB")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn camera_index(mut self, index: u32) -> Self {
    self.items.push(GStreamerInputBuilderItem::CameraIndex {
      backend: CameraBackend::native(),
      index,
    });
    self
  }

  pub fn file(mut self, path: &str) -> Self {
    self
      .items
      .push(GStreamerInputBuilderItem::FileSource(path.to_string()));
    self
  }

  /// 任意 GStreamer 支持的 URI，如 `rtsp://`、`http://`、`file://`
  pub fn uri(mut self, uri: &Url) -> Self {
    self.items.push(GStreamerInputBuilderItem::UriSource {
      uri: uri.to_string(),
      live: LIVE_SCHEMES.contains(&uri.scheme()),
    });
    self
  }

  pub fn target_format(mut self, format: &str) -> Self {
    self.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: format.to_string(),
    });
    self
  }

  fn build_camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let mut items = Vec::new();

    match path.trim_start_matches('/').parse::<u32>() {
      Ok(index) => items.push(GStreamerInputBuilderItem::CameraIndex {
        backend: CameraBackend::native(),
        index,
      }),
      Err(_) => items.push(GStreamerInputBuilderItem::CameraSource {
        camera: path.to_string(),
        io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
        format: query.get("format").cloned(),
        width: query.get("width").and_then(|v| v.parse::<u32>().ok()),
        height: query.get("height").and_then(|v| v.parse::<u32>().ok()),
        fps: query.get("fps").and_then(|v| v.parse::<u32>().ok()),
      }),
    }

    if let Some(video_flip) = Self::video_flip(query.get("rotate").map(|s| s.as_ref())) {
      items.push(video_flip);
    }

    GStreamerInputPipelineBuilder { items }
  }

  fn build_file_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let mut items = vec![GStreamerInputBuilderItem::FileSource(path.to_string())];

    if let Some(video_flip) = Self::video_flip(query.get("rotate").map(|s| s.as_ref())) {
      items.push(video_flip);
    }

    GStreamerInputPipelineBuilder { items }
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let (method, direction) = match rotate? {
      "90" => (1, 1),
      "180" => (2, 2),
      "270" => (3, 3),
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method, direction })
  }

  fn is_live(&self) -> bool {
    self.items.iter().any(GStreamerInputBuilderItem::is_live)
  }

  /// 完整的管道描述
  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");

    // 实时源只保留最新帧；文件逐帧读取，队列满时阻塞解码
    let sink = if self.is_live() {
      "appsink name=sink max-buffers=2 drop=true"
    } else {
      "appsink name=sink sync=false max-buffers=2 drop=false"
    };

    format!("{} ! {}", basic_pipeline, sink)
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    // 先构造再启动，启动失败时由 Drop 将管道置为 Null
    let input = GStreamerInput {
      pipeline,
      appsink,
      frame_index: 0,
    };

    if let Err(e) = input.pipeline.set_state(gst::State::Playing) {
      return Err(GStreamerInputError::StartFailed(
        input.bus_error().unwrap_or_else(|| e.to_string()),
      ));
    }

    let (result, _, _) = input
      .pipeline
      .state(gst::ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));
    if let Err(e) = result {
      return Err(GStreamerInputError::StartFailed(
        input.bus_error().unwrap_or_else(|| e.to_string()),
      ));
    }

    Ok(input)
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut builder = match url.host_str() {
      Some("camera") => Self::build_camera_pipeline(url.path(), &query),
      Some("file") => Self::build_file_pipeline(url.path(), &query),
      _ => {
        return Err(GStreamerInputError::SchemeMismatch);
      }
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(builder)
  }
}

/// GStreamer 视频输入
///
/// 管理 GStreamer 管道和 appsink，逐帧产出 RGB 图像。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  frame_index: u64,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  fn pull_sample(&self) -> Option<gst::Sample> {
    self
      .appsink
      .pull_sample()
      .map_err(|e| {
        if self.appsink.is_eos() {
          debug!("输入流结束");
        } else {
          error!("Failed to pull sample: {}", e);
        }
        e
      })
      .ok()
  }

  /// 取出总线上的第一条错误消息
  fn bus_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(format!(
        "{} ({})",
        err.error(),
        err.debug().map(|d| d.to_string()).unwrap_or_default()
      )),
      _ => None,
    }
  }
}

impl Iterator for GStreamerInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = self.pull_sample()?;
    let timestamp_ms = sample
      .buffer()
      .and_then(|buffer| buffer.pts())
      .map(|pts| pts.mseconds())
      .unwrap_or(0);

    let image = convert_sample_to_image(sample)
      .map_err(|e| {
        error!("Failed to fetch sample: {}", e);
        e
      })
      .ok()?;

    let frame = Frame::new(image, self.frame_index, timestamp_ms);
    self.frame_index += 1;
    Some(frame)
  }
}

fn convert_sample_to_image(sample: gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;

  let bgr = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    other => return Err(GStreamerInputError::UnsupportedFormat(format!("{:?}", other))),
  };

  rgb_from_strided(map.as_slice(), width, height, stride, bgr)
}

/// 将带行对齐的 RGB/BGR 数据拷贝为紧凑的 RGB 图像
fn rgb_from_strided(
  data: &[u8],
  width: usize,
  height: usize,
  stride: usize,
  bgr: bool,
) -> Result<RgbImage, GStreamerInputError> {
  let row_bytes = width * 3;
  let expected_size = if height == 0 {
    0
  } else {
    stride * (height - 1) + row_bytes
  };
  if stride < row_bytes || data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_bytes * height);
  for y in 0..height {
    let row = &data[y * stride..y * stride + row_bytes];
    if bgr {
      for px in row.chunks_exact(3) {
        pixels.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      pixels.extend_from_slice(row);
    }
  }

  RgbImage::from_raw(width as u32, height as u32, pixels).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row_bytes * height,
      actual: data.len(),
    },
  )
}
