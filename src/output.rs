// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;

use crate::model::DetectResult;

pub mod draw;
pub use self::draw::{Draw, FontError};

mod overlay;
pub use self::overlay::{FpsOverlay, PpeOverlay};

mod gstreamer_preview;
pub use self::gstreamer_preview::{GStreamerPreview, PreviewError, key_from_event, pack_rows};

mod snapshot;
pub use self::snapshot::{Snapshot, SnapshotError};

/// 预览窗口中的按键命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
  Save,
  Quit,
}

impl KeyCommand {
  /// 按键名称到命令，大小写视为同一键
  pub fn from_key_name(key: &str) -> Option<Self> {
    match key {
      "s" | "S" => Some(KeyCommand::Save),
      "q" | "Q" => Some(KeyCommand::Quit),
      _ => None,
    }
  }
}

/// 显示标注后的帧并读取按键
pub trait Display {
  type Error;

  fn show(&mut self, image: &RgbImage) -> Result<(), Self::Error>;

  /// 非阻塞地取出一个待处理的按键命令
  fn poll_key(&mut self) -> Option<KeyCommand>;
}

/// 单帧统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
  pub index: u64,
  pub fps: f64,
}

/// 在帧上叠加检测结果和状态信息
pub trait Overlay {
  fn annotate(&mut self, draw: &Draw, image: &mut RgbImage, result: &DetectResult, stats: &FrameStats);
}
