// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/model/labels.rs - 类别标签
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

use std::collections::BTreeMap;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

const UNKNOWN_LABEL: &str = "unknown";

/// 类别 id 到名称的映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: Vec<String>,
}

impl Default for Labels {
  fn default() -> Self {
    Self::coco()
  }
}

impl Labels {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  pub fn coco() -> Self {
    Self::new(COCO_CLASSES)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 类别名称，越界时返回 "unknown"
  pub fn name(&self, class_id: u32) -> &str {
    self
      .names
      .get(class_id as usize)
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }

  pub fn id_of(&self, name: &str) -> Option<u32> {
    self.names.iter().position(|n| n == name).map(|i| i as u32)
  }

  /// 解析 Ultralytics 导出时写入的 `names` 元数据，
  /// 形如 `{0: 'person', 1: 'bicycle'}`。缺失的 id 以 `classN` 补齐。
  pub fn parse_metadata(text: &str) -> Option<Self> {
    let body = text.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut entries = BTreeMap::new();
    let mut rest = body.trim_start();

    while !rest.is_empty() {
      let colon = rest.find(':')?;
      let id: u32 = rest[..colon].trim().parse().ok()?;
      let (name, remain) = parse_quoted(rest[colon + 1..].trim_start())?;
      entries.insert(id, name);

      rest = remain.trim_start();
      if let Some(next) = rest.strip_prefix(',') {
        rest = next.trim_start();
      } else if !rest.is_empty() {
        return None;
      }
    }

    let max_id = *entries.keys().next_back()?;
    let names = (0..=max_id)
      .map(|id| {
        entries
          .remove(&id)
          .unwrap_or_else(|| format!("class{}", id))
      })
      .collect::<Vec<_>>();
    Some(Self { names })
  }
}

/// 解析一个 Python 风格的单/双引号字符串，返回内容和剩余部分
fn parse_quoted(text: &str) -> Option<(String, &str)> {
  let quote = text.chars().next().filter(|c| *c == '\'' || *c == '"')?;
  let mut value = String::new();
  let mut escaped = false;

  for (offset, ch) in text[1..].char_indices() {
    if escaped {
      value.push(ch);
      escaped = false;
    } else if ch == '\\' {
      escaped = true;
    } else if ch == quote {
      return Some((value, &text[1 + offset + ch.len_utf8()..]));
    } else {
      value.push(ch);
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn coco_names() {
    let labels = Labels::coco();
    assert_eq!(labels.len(), 80);
    assert_eq!(labels.name(0), "person");
    assert_eq!(labels.name(79), "toothbrush");
    assert_eq!(labels.name(80), "unknown");
    assert_eq!(labels.id_of("dog"), Some(16));
  }

  #[test]
  fn parses_ultralytics_metadata() {
    let labels =
      Labels::parse_metadata("{0: 'hardhat', 1: 'vest', 2: 'safety glasses', 3: 'person'}")
        .unwrap();
    assert_eq!(labels.len(), 4);
    assert_eq!(labels.name(2), "safety glasses");
    assert_eq!(labels.id_of("vest"), Some(1));
  }

  #[test]
  fn parses_double_quotes_and_escapes() {
    let labels = Labels::parse_metadata(r#"{0: "worker's helmet", 1: 'it\'s'}"#).unwrap();
    assert_eq!(labels.name(0), "worker's helmet");
    assert_eq!(labels.name(1), "it's");
  }

  #[test]
  fn fills_gaps() {
    let labels = Labels::parse_metadata("{0: 'a', 2: 'c'}").unwrap();
    assert_eq!(labels.name(1), "class1");
    assert_eq!(labels.len(), 3);
  }

  #[test]
  fn trailing_comma_is_accepted() {
    let labels = Labels::parse_metadata("{0: 'a', }").unwrap();
    assert_eq!(labels.len(), 1);
  }

  #[test]
  fn rejects_garbage() {
    assert!(Labels::parse_metadata("").is_none());
    assert!(Labels::parse_metadata("{}").is_none());
    assert!(Labels::parse_metadata("['a', 'b']").is_none());
    assert!(Labels::parse_metadata("{0: 'a' 1: 'b'}").is_none());
    assert!(Labels::parse_metadata("{x: 'a'}").is_none());
    assert!(Labels::parse_metadata("{0: 'unterminated}").is_none());
  }
}
