// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/output/snapshot.rs - 保存当前帧
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

use std::path::{Path, PathBuf};

use chrono::Utc;
use image::RgbImage;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_CAPTURE_DIR: &str = "captures";

#[derive(Error, Debug)]
pub enum SnapshotError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 按 `capture_<unix 秒>.png` 保存标注后的帧
#[derive(Debug, Clone)]
pub struct Snapshot {
  dir: PathBuf,
}

impl Default for Snapshot {
  fn default() -> Self {
    Self::new(DEFAULT_CAPTURE_DIR)
  }
}

impl Snapshot {
  pub fn new<P: AsRef<Path>>(dir: P) -> Self {
    Self {
      dir: dir.as_ref().to_path_buf(),
    }
  }

  /// 同一秒内的保存会覆盖前一张
  pub fn path_for(&self, unix_seconds: i64) -> PathBuf {
    self.dir.join(format!("capture_{}.png", unix_seconds))
  }

  pub fn save(&self, image: &RgbImage) -> Result<PathBuf, SnapshotError> {
    self.save_at(image, Utc::now().timestamp())
  }

  fn save_at(&self, image: &RgbImage, unix_seconds: i64) -> Result<PathBuf, SnapshotError> {
    std::fs::create_dir_all(&self.dir)?;
    let path = self.path_for(unix_seconds);
    image.save(&path)?;
    info!("Saved {}", path.display());
    Ok(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn names_files_by_timestamp() {
    let snapshot = Snapshot::new("shots");
    assert_eq!(
      snapshot.path_for(1_700_000_000),
      PathBuf::from("shots").join("capture_1700000000.png")
    );
  }

  #[test]
  fn creates_directory_and_writes_png() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = Snapshot::new(dir.path().join("nested/captures"));
    let image = RgbImage::from_pixel(5, 4, image::Rgb([9, 8, 7]));

    let path = snapshot.save_at(&image, 42).unwrap();
    assert!(path.ends_with("capture_42.png"));

    let loaded = image::open(&path).unwrap().to_rgb8();
    assert_eq!(loaded.dimensions(), (5, 4));
    assert_eq!(loaded.get_pixel(4, 3).0, [9, 8, 7]);

    // 同一秒再次保存覆盖原文件
    snapshot.save_at(&RgbImage::new(2, 2), 42).unwrap();
    assert_eq!(image::open(&path).unwrap().to_rgb8().dimensions(), (2, 2));
  }

  #[test]
  fn save_uses_current_time() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = Snapshot::new(dir.path());
    let before = Utc::now().timestamp();
    let path = snapshot.save(&RgbImage::new(1, 1)).unwrap();
    let name = path.file_stem().unwrap().to_str().unwrap();
    let stamp: i64 = name.trim_start_matches("capture_").parse().unwrap();
    assert!(stamp >= before && stamp <= before + 2);
  }
}
