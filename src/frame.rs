// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/frame.rs - 栅格图像定义
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

use image::{DynamicImage, RgbImage, RgbaImage};

use crate::error::MeasureError;

const RGBA_CHANNELS: usize = 4;

/// 不可变的 RGBA 栅格图像，整个测量会话期间只读共享
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
  pixels: RgbaImage,
}

impl RasterImage {
  pub fn from_rgba(pixels: RgbaImage) -> Result<Self, MeasureError> {
    if pixels.width() == 0 || pixels.height() == 0 {
      return Err(MeasureError::invalid_input(format!(
        "图像尺寸为空: {}x{}",
        pixels.width(),
        pixels.height()
      )));
    }
    Ok(Self { pixels })
  }

  pub fn from_rgb(image: RgbImage) -> Result<Self, MeasureError> {
    Self::from_rgba(DynamicImage::ImageRgb8(image).to_rgba8())
  }

  /// 从按行排列的 RGBA 字节构造
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, MeasureError> {
    let expected = RGBA_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(MeasureError::invalid_input(format!(
        "数据长度不匹配: 期望长度 {}, 实际长度 {}",
        expected,
        data.len()
      )));
    }
    let pixels = RgbaImage::from_raw(width, height, data)
      .ok_or_else(|| MeasureError::invalid_input("无法创建 RGBA 图像"))?;
    Self::from_rgba(pixels)
  }

  pub fn width(&self) -> u32 {
    self.pixels.width()
  }

  pub fn height(&self) -> u32 {
    self.pixels.height()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.pixels.dimensions()
  }

  pub fn pixel_count(&self) -> u64 {
    self.width() as u64 * self.height() as u64
  }

  pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
    self.pixels.get_pixel(x, y).0
  }

  /// 按行优先顺序遍历所有像素
  pub fn rgba_pixels(&self) -> impl Iterator<Item = [u8; 4]> + '_ {
    self.pixels.pixels().map(|p| p.0)
  }

  pub fn as_rgba(&self) -> &RgbaImage {
    &self.pixels
  }
}

impl TryFrom<DynamicImage> for RasterImage {
  type Error = MeasureError;

  fn try_from(image: DynamicImage) -> Result<Self, Self::Error> {
    Self::from_rgba(image.to_rgba8())
  }
}
