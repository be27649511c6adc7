// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/bin/ppe.rs - 个人防护装备检测预览
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use liaowang::{
  input::{InputWrapper, SourceSpec},
  model::{Device, YoloBuilder, YoloError},
  output::{Draw, GStreamerPreview, PpeOverlay, Snapshot},
  ppe,
  task::{LiveTask, Task, interrupt_channel},
};

const WINDOW_TITLE: &str = "PPE Detection";

/// 安全帽、反光背心、护目镜检测，按 q 退出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, default_value = ppe::DEFAULT_MODEL, value_name = "FILE")]
  pub model: PathBuf,

  /// 输入来源：摄像头索引、视频文件、图片或 gst:// URL
  #[arg(long, default_value = "0", value_name = "SOURCE")]
  pub source: SourceSpec,

  /// 模型输入尺寸，帧本身不缩放
  #[arg(long, default_value_t = 640, value_name = "PIXELS")]
  pub imgsz: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = ppe::DEFAULT_CONFIDENCE, value_name = "THRESHOLD")]
  pub conf: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = ppe::DEFAULT_IOU, value_name = "THRESHOLD")]
  pub iou: f32,

  /// 推理设备：cpu、cuda 或 cuda:N
  #[arg(long, default_value = "cpu", value_name = "DEVICE")]
  pub device: Device,

  /// 面板字体（TTF/OTF），默认搜索系统字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 截图保存目录
  #[arg(long, default_value = "captures", value_name = "DIR")]
  pub capture_dir: PathBuf,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value_t = 0, value_name = "COUNT")]
  pub max_frames: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {}", args.source);

  let model = match YoloBuilder::new(&args.model)
    .device(args.device)
    .image_size(args.imgsz)
    .confidence(args.conf)
    .iou(args.iou)
    .build()
  {
    Ok(model) => model,
    Err(YoloError::ModelNotFound(path)) => {
      eprintln!("Model not found: {}", path.display());
      eprintln!("Place the PPE weights next to the binary, or pass --model path");
      std::process::exit(1);
    }
    Err(e) => return Err(e.into()),
  };

  for label in [ppe::HARDHAT, ppe::VEST, ppe::SAFETY_GLASSES] {
    if model.labels().id_of(label).is_none() {
      warn!("模型类别中没有 '{}'，该项将始终显示 No", label);
    }
  }

  let input = match InputWrapper::open(&args.source) {
    Ok(input) => input,
    Err(e) => {
      warn!("{}", e);
      eprintln!("Cannot open source: {}", args.source);
      std::process::exit(1);
    }
  };

  let preview = GStreamerPreview::new(WINDOW_TITLE)?;
  let draw = Draw::with_font_path(args.font.as_deref())?;

  let mut task = LiveTask::new(PpeOverlay::default(), draw)
    .with_snapshot(Snapshot::new(&args.capture_dir))
    .with_frame_number(Some(args.max_frames));
  match interrupt_channel() {
    Ok(rx) => task = task.with_interrupt(rx),
    Err(e) => warn!("无法设置 Ctrl-C 处理: {}", e),
  }

  let summary = task.run_task(input, model, preview)?;
  info!("共处理 {} 帧", summary.frames);

  Ok(())
}
