// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::{fmt, path::PathBuf, str::FromStr};

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, is_image_path};

mod gstreamer_input;
pub use self::gstreamer_input::{
  CameraBackend, GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("Source not found: {0}")]
  SourceNotFound(PathBuf),
}

/// 输入源描述
///
/// - 纯数字：摄像头索引
/// - `gst://` URL：显式的 GStreamer 管道
/// - 其它 URL（`rtsp://`、`http://`、`file://` 等）：交给 `uridecodebin`
/// - 图片扩展名：单张图像
/// - 其它：视频文件路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
  Camera(u32),
  Url(Url),
  #[cfg(feature = "read_image_file")]
  Image(PathBuf),
  File(PathBuf),
}

impl FromStr for SourceSpec {
  type Err = url::ParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if let Ok(index) = s.parse::<u32>() {
      return Ok(SourceSpec::Camera(index));
    }

    if s.contains("://") {
      return Url::parse(s).map(SourceSpec::Url);
    }

    let path = PathBuf::from(s);
    #[cfg(feature = "read_image_file")]
    {
      if is_image_path(&path) {
        return Ok(SourceSpec::Image(path));
      }
    }

    Ok(SourceSpec::File(path))
  }
}

impl fmt::Display for SourceSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceSpec::Camera(index) => write!(f, "camera {}", index),
      SourceSpec::Url(url) => write!(f, "{}", url),
      #[cfg(feature = "read_image_file")]
      SourceSpec::Image(path) => write!(f, "{}", path.display()),
      SourceSpec::File(path) => write!(f, "{}", path.display()),
    }
  }
}

pub enum InputWrapper {
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl InputWrapper {
  /// 打开输入源
  pub fn open(spec: &SourceSpec) -> Result<Self, InputError> {
    match spec {
      SourceSpec::Camera(index) => {
        let input = GStreamerInputPipelineBuilder::new()
          .camera_index(*index)
          .target_format("RGB")
          .build()?;
        Ok(InputWrapper::GStreamerInput(input))
      }
      SourceSpec::Url(url) => Self::from_url(url),
      #[cfg(feature = "read_image_file")]
      SourceSpec::Image(path) => {
        if !path.exists() {
          return Err(InputError::SourceNotFound(path.clone()));
        }
        Ok(InputWrapper::ReadImageFile(ImageFileInput::open(path)?))
      }
      SourceSpec::File(path) => {
        if !path.exists() {
          return Err(InputError::SourceNotFound(path.clone()));
        }
        let input = GStreamerInputPipelineBuilder::new()
          .file(&path.to_string_lossy())
          .target_format("RGB")
          .build()?;
        Ok(InputWrapper::GStreamerInput(input))
      }
    }
  }
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
      let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
      return Ok(InputWrapper::GStreamerInput(input));
    }
    #[cfg(feature = "read_image_file")]
    {
      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    let input = GStreamerInputPipelineBuilder::new()
      .uri(url)
      .target_format("RGB")
      .build()?;
    Ok(InputWrapper::GStreamerInput(input))
  }
}

impl Iterator for InputWrapper {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::GStreamerInput(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn digits_are_camera_indices() {
    assert_eq!("0".parse::<SourceSpec>().unwrap(), SourceSpec::Camera(0));
    assert_eq!(" 2 ".parse::<SourceSpec>().unwrap(), SourceSpec::Camera(2));
  }

  #[test]
  fn urls_are_kept() {
    let spec = "gst://camera/dev/video0".parse::<SourceSpec>().unwrap();
    assert!(matches!(spec, SourceSpec::Url(url) if url.scheme() == "gst"));
  }

  #[test]
  fn other_strings_are_video_files() {
    assert_eq!(
      "videos/street.mp4".parse::<SourceSpec>().unwrap(),
      SourceSpec::File(PathBuf::from("videos/street.mp4"))
    );
    assert_eq!(
      "-1".parse::<SourceSpec>().unwrap(),
      SourceSpec::File(PathBuf::from("-1"))
    );
  }

  #[cfg(feature = "read_image_file")]
  #[test]
  fn image_extensions_are_still_images() {
    assert_eq!(
      "frame.png".parse::<SourceSpec>().unwrap(),
      SourceSpec::Image(PathBuf::from("frame.png"))
    );
  }

  #[test]
  fn missing_video_file_is_reported() {
    let spec = SourceSpec::File(PathBuf::from("/definitely/not/here.mp4"));
    assert!(matches!(
      InputWrapper::open(&spec),
      Err(InputError::SourceNotFound(_))
    ));
  }

  #[test]
  fn stream_urls_are_sources() {
    let spec = "rtsp://camera.local/stream".parse::<SourceSpec>().unwrap();
    assert!(matches!(spec, SourceSpec::Url(ref url) if url.scheme() == "rtsp"));
    assert_eq!(spec.to_string(), "rtsp://camera.local/stream");
  }

  #[test]
  fn display_names_the_source() {
    assert_eq!(SourceSpec::Camera(1).to_string(), "camera 1");
    assert_eq!(
      SourceSpec::File(PathBuf::from("a.mp4")).to_string(),
      "a.mp4"
    );
  }
}
