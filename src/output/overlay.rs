// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/output/overlay.rs - 帧率与防护装备面板
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

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};
use tracing::debug;

use crate::{
  model::DetectResult,
  output::{Draw, FrameStats, Overlay},
  ppe::{PpeCounts, PpeStatus, Presence},
};

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

const FPS_ORIGIN: (i32, i32) = (10, 30);
const FPS_SCALE: f32 = 0.8;

const PANEL_X: i32 = 50;
const PANEL_ROWS: [i32; 3] = [50, 90, 130];
/// 状态值的横坐标，与各行标题宽度对应
const PANEL_STATUS_X: [i32; 3] = [150, 150, 200];
const PANEL_SCALE: f32 = 0.7;
/// 无字体时状态色块的边长
const PANEL_MARK_SIZE: u32 = 20;

/// 检测框加左上角帧率
#[derive(Debug, Default)]
pub struct FpsOverlay;

impl Overlay for FpsOverlay {
  fn annotate(&mut self, draw: &Draw, image: &mut RgbImage, result: &DetectResult, stats: &FrameStats) {
    draw.draw_detections(image, result);
    draw.draw_text(
      image,
      &format!("FPS: {:.1}", stats.fps),
      FPS_ORIGIN.0,
      FPS_ORIGIN.1,
      FPS_SCALE,
      GREEN,
    );
  }
}

/// 检测框加安全帽、反光背心、护目镜的有无面板
#[derive(Debug, Default)]
pub struct PpeOverlay {
  last: Option<PpeStatus>,
}

impl PpeOverlay {
  pub fn last_status(&self) -> Option<PpeStatus> {
    self.last
  }
}

pub fn presence_color(presence: Presence) -> Rgb<u8> {
  match presence {
    Presence::Yes => GREEN,
    Presence::No => RED,
  }
}

impl Overlay for PpeOverlay {
  fn annotate(&mut self, draw: &Draw, image: &mut RgbImage, result: &DetectResult, _: &FrameStats) {
    draw.draw_detections(image, result);

    let counts = PpeCounts::from_result(result);
    let status = counts.status();
    if self.last != Some(status) {
      debug!("防护装备状态变化: {:?}", counts);
    }
    self.last = Some(status);

    for (((caption, presence), y), status_x) in status
      .rows()
      .into_iter()
      .zip(PANEL_ROWS)
      .zip(PANEL_STATUS_X)
    {
      let color = presence_color(presence);
      draw.draw_text(image, caption, PANEL_X, y, PANEL_SCALE, BLACK);
      if !draw.draw_text(image, presence.as_str(), status_x, y, PANEL_SCALE, color) {
        let top = y - PANEL_MARK_SIZE as i32;
        draw_filled_rect_mut(
          image,
          Rect::at(status_x, top).of_size(PANEL_MARK_SIZE, PANEL_MARK_SIZE),
          color,
        );
      }
    }
  }
}
