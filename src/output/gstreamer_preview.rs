// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/output/gstreamer_preview.rs - GStreamer 预览窗口
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

//! # GStreamer 预览窗口
//!
//! 通过 `appsrc ! videoconvert ! autovideosink` 显示标注后的帧。
//! 窗口中的按键以导航事件的形式逆流到达 `appsrc`，
//! 在 src pad 上拦截后转换为 [`KeyCommand`] 放入通道。
//!
//! 窗口被关闭或管道出错时视为退出。

use std::sync::mpsc::{self, Receiver};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::output::{Display, KeyCommand};

const PREVIEW_PIPELINE: &str =
  "appsrc name=src is-live=true format=time do-timestamp=true ! videoconvert ! autovideosink sync=false";
const NAVIGATION_STRUCTURE: &str = "application/x-gst-navigation";

#[derive(Error, Debug)]
pub enum PreviewError {
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("appsrc 没有 src pad")]
  PadNotFound,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("推送帧失败: {0:?}")]
  PushError(gst::FlowError),
}

pub struct GStreamerPreview {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  keys: Receiver<KeyCommand>,
  title: String,
  size: Option<(u32, u32)>,
  closed: bool,
}

impl GStreamerPreview {
  pub fn new(title: &str) -> Result<Self, PreviewError> {
    gst::init()?;

    info!("创建预览窗口: {}", title);
    let pipeline = gst::parse::launch(PREVIEW_PIPELINE)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| PreviewError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(PreviewError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| PreviewError::AppSrcConversionFailed)?;

    let (tx, keys) = mpsc::channel();
    let pad = appsrc.static_pad("src").ok_or(PreviewError::PadNotFound)?;
    pad.add_probe(gst::PadProbeType::EVENT_UPSTREAM, move |_, info| {
      if let Some(gst::PadProbeData::Event(ref event)) = info.data {
        if let Some(command) = key_from_event(event) {
          debug!("按键命令: {:?}", command);
          let _ = tx.send(command);
        }
      }
      gst::PadProbeReturn::Ok
    });

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerPreview {
      pipeline,
      appsrc,
      keys,
      title: title.to_string(),
      size: None,
      closed: false,
    })
  }

  /// 帧尺寸变化时重新设置 caps
  fn negotiate(&mut self, width: u32, height: u32) -> Result<(), PreviewError> {
    if self.size == Some((width, height)) {
      return Ok(());
    }

    let caps = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
      .fps(gst::Fraction::new(0, 1))
      .build()?
      .to_caps()?;
    info!("预览尺寸 {}x{}", width, height);
    self.appsrc.set_caps(Some(&caps));

    if self.size.is_none() {
      let mut tags = gst::TagList::new();
      if let Some(tags) = tags.get_mut() {
        tags.add::<gst::tags::Title>(&self.title.as_str(), gst::TagMergeMode::Replace);
      }
      if !self.appsrc.send_event(gst::event::Tag::new(tags)) {
        debug!("窗口标题未被接受");
      }
    }

    self.size = Some((width, height));
    Ok(())
  }

  /// 管道出错或结束时返回 true
  fn poll_bus(&mut self) -> bool {
    let Some(bus) = self.pipeline.bus() else {
      return false;
    };

    while let Some(message) =
      bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos])
    {
      match message.view() {
        gst::MessageView::Error(err) => {
          warn!("预览窗口错误: {} ({:?})", err.error(), err.debug());
          return true;
        }
        gst::MessageView::Eos(_) => {
          info!("预览窗口已关闭");
          return true;
        }
        _ => {}
      }
    }
    false
  }
}

impl Display for GStreamerPreview {
  type Error = PreviewError;

  fn show(&mut self, image: &RgbImage) -> Result<(), Self::Error> {
    if self.closed {
      return Ok(());
    }

    let (width, height) = image.dimensions();
    self.negotiate(width, height)?;

    let buffer = gst::Buffer::from_mut_slice(pack_rows(image));
    match self.appsrc.push_buffer(buffer) {
      Ok(_) => Ok(()),
      // 窗口关闭后下游返回 Flushing/Eos，由 poll_key 报告退出
      Err(gst::FlowError::Flushing) | Err(gst::FlowError::Eos) => {
        debug!("预览管道已停止接收帧");
        Ok(())
      }
      Err(e) => Err(PreviewError::PushError(e)),
    }
  }

  fn poll_key(&mut self) -> Option<KeyCommand> {
    if !self.closed && self.poll_bus() {
      self.closed = true;
    }
    if self.closed {
      return Some(KeyCommand::Quit);
    }
    self.keys.try_recv().ok()
  }
}

impl Drop for GStreamerPreview {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer preview pipeline: {}", e);
    }
  }
}

/// RGB 行按 4 字节对齐，与 GStreamer 默认的 RGB 行跨度一致
pub fn pack_rows(image: &RgbImage) -> Vec<u8> {
  let width = image.width() as usize;
  let height = image.height() as usize;
  let row = width * 3;
  let stride = (row + 3) & !3;

  if stride == row {
    return image.as_raw().clone();
  }

  let mut data = vec![0u8; stride * height];
  for (dst, src) in data.chunks_exact_mut(stride).zip(image.as_raw().chunks_exact(row)) {
    dst[..row].copy_from_slice(src);
  }
  data
}

/// 从导航事件中解析按键命令，只处理按下事件
pub fn key_from_event(event: &gst::EventRef) -> Option<KeyCommand> {
  if event.type_() != gst::EventType::Navigation {
    return None;
  }
  let structure = event.structure()?;
  if !structure.has_name(NAVIGATION_STRUCTURE) {
    return None;
  }
  if structure.get::<&str>("event").ok()? != "key-press" {
    return None;
  }
  KeyCommand::from_key_name(structure.get::<&str>("key").ok()?)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn navigation(event: &str, key: &str) -> gst::Event {
    gst::init().unwrap();
    gst::event::Navigation::new(
      gst::Structure::builder(NAVIGATION_STRUCTURE)
        .field("event", event)
        .field("key", key)
        .build(),
    )
  }

  #[test]
  fn key_presses_become_commands() {
    assert_eq!(key_from_event(&navigation("key-press", "s")), Some(KeyCommand::Save));
    assert_eq!(key_from_event(&navigation("key-press", "q")), Some(KeyCommand::Quit));
    assert_eq!(key_from_event(&navigation("key-press", "x")), None);
    assert_eq!(key_from_event(&navigation("key-release", "q")), None);
  }

  #[test]
  fn other_events_are_ignored() {
    gst::init().unwrap();
    assert_eq!(key_from_event(&gst::event::Eos::new()), None);
  }

  #[test]
  fn rows_are_padded_to_four_bytes() {
    // 3 像素宽：9 字节一行，补齐到 12
    let mut image = RgbImage::new(3, 2);
    image.put_pixel(2, 1, image::Rgb([7, 8, 9]));
    let data = pack_rows(&image);
    assert_eq!(data.len(), 24);
    assert_eq!(&data[18..24], &[7, 8, 9, 0, 0, 0]);
  }

  #[test]
  fn aligned_rows_are_copied_as_is() {
    let image = RgbImage::from_pixel(4, 2, image::Rgb([1, 2, 3]));
    assert_eq!(pack_rows(&image), image.as_raw().clone());
  }
}
