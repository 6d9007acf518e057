// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageFormat;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, error::MeasureError, frame::RasterImage};

use super::{CaptureSource, InputError};

/// 解码上传的图像。声明了 MIME 时必须是已知的 `image/*` 类型，
/// 否则根据文件头推断格式。
pub fn decode_image_bytes(bytes: &[u8], mime: Option<&str>) -> Result<RasterImage, MeasureError> {
  let format = match mime {
    Some(mime) => {
      let mime = mime.trim().to_lowercase();
      if !mime.starts_with("image/") {
        return Err(MeasureError::invalid_input(format!(
          "文件类型 {} 不是图像",
          mime
        )));
      }
      ImageFormat::from_mime_type(&mime)
        .ok_or_else(|| MeasureError::invalid_input(format!("不支持的图像类型: {}", mime)))?
    }
    None => image::guess_format(bytes)
      .map_err(|e| MeasureError::invalid_input(format!("无法识别的文件格式: {}", e)))?,
  };
  debug!("解码图像, 格式 {:?}, {} 字节", format, bytes.len());
  let image = image::load_from_memory_with_format(bytes, format)?;
  RasterImage::try_from(image)
}

pub struct ImageFileInput {
  path: PathBuf,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }

    Ok(ImageFileInput {
      path: PathBuf::from(url.path()),
    })
  }
}

impl ImageFileInput {
  /// 读取文件内容，MIME 类型由扩展名推断
  pub fn into_source(self) -> Result<CaptureSource, InputError> {
    let bytes = std::fs::read(&self.path)?;
    let mime = ImageFormat::from_path(&self.path)
      .ok()
      .map(|f| f.to_mime_type().to_string());
    Ok(CaptureSource::File { bytes, mime })
  }
}
