// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/ppe.rs - 个人防护装备统计
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

use std::fmt;

use crate::model::DetectResult;

pub const HARDHAT: &str = "hardhat";
pub const VEST: &str = "vest";
pub const SAFETY_GLASSES: &str = "safety glasses";

pub const DEFAULT_MODEL: &str = "bestn.onnx";
pub const DEFAULT_CONFIDENCE: f32 = 0.8;
pub const DEFAULT_IOU: f32 = 0.3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpeCounts {
  pub hardhat: usize,
  pub vest: usize,
  pub safety_glasses: usize,
}

impl PpeCounts {
  /// 只统计标签完全匹配的检测，其余类别忽略
  pub fn from_result(result: &DetectResult) -> Self {
    let mut counts = PpeCounts::default();
    for item in result.items.iter() {
      match result.label_of(item) {
        HARDHAT => counts.hardhat += 1,
        VEST => counts.vest += 1,
        SAFETY_GLASSES => counts.safety_glasses += 1,
        _ => {}
      }
    }
    counts
  }

  pub fn status(&self) -> PpeStatus {
    PpeStatus {
      hardhat: Presence::from_count(self.hardhat),
      vest: Presence::from_count(self.vest),
      safety_glasses: Presence::from_count(self.safety_glasses),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
  Yes,
  No,
}

impl Presence {
  pub fn from_count(count: usize) -> Self {
    if count > 0 { Presence::Yes } else { Presence::No }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Presence::Yes => "Yes",
      Presence::No => "No",
    }
  }
}

impl fmt::Display for Presence {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpeStatus {
  pub hardhat: Presence,
  pub vest: Presence,
  pub safety_glasses: Presence,
}

impl PpeStatus {
  /// 面板行：(标题, 状态)
  pub fn rows(&self) -> [(&'static str, Presence); 3] {
    [
      ("Hardhat: ", self.hardhat),
      ("Vest: ", self.vest),
      ("Safety Glasses: ", self.safety_glasses),
    ]
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::model::{DetectItem, Labels};

  fn result(class_ids: &[u32]) -> DetectResult {
    let labels = Arc::new(Labels::new(["hardhat", "vest", "safety glasses", "person", "Hardhat"]));
    DetectResult::new(
      class_ids
        .iter()
        .map(|id| DetectItem::new(*id, 0.9, [0.0, 0.0, 1.0, 1.0]))
        .collect(),
      labels,
    )
  }

  #[test]
  fn counts_only_exact_labels() {
    let counts = PpeCounts::from_result(&result(&[0, 0, 1, 3, 4, 9]));
    assert_eq!(
      counts,
      PpeCounts {
        hardhat: 2,
        vest: 1,
        safety_glasses: 0
      }
    );
  }

  #[test]
  fn counts_map_to_presence() {
    let status = PpeCounts::from_result(&result(&[0, 2])).status();
    assert_eq!(status.hardhat, Presence::Yes);
    assert_eq!(status.vest, Presence::No);
    assert_eq!(status.safety_glasses, Presence::Yes);
  }

  #[test]
  fn empty_frame_is_all_no() {
    let status = PpeCounts::from_result(&result(&[])).status();
    assert!(status.rows().iter().all(|(_, p)| *p == Presence::No));
    assert_eq!(status.rows()[2].0, "Safety Glasses: ");
    assert_eq!(Presence::No.to_string(), "No");
  }
}
