// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/model/tracker.rs - 跨帧跟踪编号
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

use tracing::trace;

use crate::model::{DetectItem, DetectResult, Model, iou};

pub const DEFAULT_MATCH_IOU: f32 = 0.3;
pub const DEFAULT_MAX_MISSED: u32 = 30;

#[derive(Debug, Clone)]
struct Track {
  id: u64,
  class_id: u32,
  bbox: [f32; 4],
  missed: u32,
}

/// 基于 IoU 的贪心关联，为检测结果分配跨帧稳定的编号
#[derive(Debug)]
pub struct IouTracker {
  tracks: Vec<Track>,
  next_id: u64,
  match_iou: f32,
  max_missed: u32,
}

impl Default for IouTracker {
  fn default() -> Self {
    Self::new(DEFAULT_MATCH_IOU, DEFAULT_MAX_MISSED)
  }
}

impl IouTracker {
  pub fn new(match_iou: f32, max_missed: u32) -> Self {
    Self {
      tracks: Vec::new(),
      next_id: 1,
      match_iou,
      max_missed,
    }
  }

  pub fn active_tracks(&self) -> usize {
    self.tracks.len()
  }

  /// 更新轨迹并写入 `track_id`
  pub fn update(&mut self, items: &mut [DetectItem]) {
    let mut matched = vec![false; self.tracks.len()];

    // 分数高的检测优先匹配
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|a, b| items[*b].score.total_cmp(&items[*a].score));

    for index in order {
      let item = &mut items[index];
      let best = self
        .tracks
        .iter()
        .enumerate()
        .filter(|(t, track)| !matched[*t] && track.class_id == item.class_id)
        .map(|(t, track)| (t, iou(&track.bbox, &item.bbox)))
        .filter(|(_, v)| *v >= self.match_iou)
        .max_by(|a, b| a.1.total_cmp(&b.1));

      match best {
        Some((t, _)) => {
          matched[t] = true;
          let track = &mut self.tracks[t];
          track.bbox = item.bbox;
          track.missed = 0;
          item.track_id = Some(track.id);
        }
        None => {
          let id = self.next_id;
          self.next_id += 1;
          trace!("新轨迹 {} (类别 {})", id, item.class_id);
          self.tracks.push(Track {
            id,
            class_id: item.class_id,
            bbox: item.bbox,
            missed: 0,
          });
          matched.push(true);
          item.track_id = Some(id);
        }
      }
    }

    for (track, hit) in self.tracks.iter_mut().zip(matched.iter()) {
      if !hit {
        track.missed += 1;
      }
    }
    let max_missed = self.max_missed;
    self.tracks.retain(|track| track.missed <= max_missed);
  }
}

/// 为任意检测模型附加跟踪
pub struct Tracked<M> {
  model: M,
  tracker: IouTracker,
}

impl<M> Tracked<M> {
  pub fn new(model: M) -> Self {
    Self::with_tracker(model, IouTracker::default())
  }

  pub fn with_tracker(model: M, tracker: IouTracker) -> Self {
    Self { model, tracker }
  }
}

impl<M> Model for Tracked<M>
where
  M: Model<Output = DetectResult>,
{
  type Input = M::Input;
  type Output = DetectResult;
  type Error = M::Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let mut result = self.model.infer(input)?;
    self.tracker.update(&mut result.items);
    Ok(result)
  }
}
