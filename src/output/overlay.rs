// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/output/overlay.rs - 测量结果可视化
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

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::{
  error::MeasureError,
  frame::RasterImage,
  geometry::Point,
  segmentation::{Segmentation, SegmentationMask},
};

use super::ImageSnapshot;

const WOUND_TINT: [u8; 3] = [0, 200, 83]; // 绿色
const TINT_ALPHA: f32 = 0.45;
const OUTLINE_COLOR: [u8; 4] = [255, 214, 0, 255]; // 黄色
const CALIBRATION_COLOR: [u8; 4] = [0, 120, 255, 255]; // 蓝色
const BBOX_COLOR: [u8; 4] = [255, 255, 255, 255];
const MARKER_RADIUS: i32 = 4;

pub struct Overlay {
  wound_tint: [u8; 3],
  tint_alpha: f32,
  outline_color: [u8; 4],
  calibration_color: [u8; 4],
  bbox_color: [u8; 4],
  marker_radius: i32,
}

impl Default for Overlay {
  fn default() -> Self {
    Self {
      wound_tint: WOUND_TINT,
      tint_alpha: TINT_ALPHA,
      outline_color: OUTLINE_COLOR,
      calibration_color: CALIBRATION_COLOR,
      bbox_color: BBOX_COLOR,
      marker_radius: MARKER_RADIUS,
    }
  }
}

impl Overlay {
  /// 在原图副本上叠加标定线段、分割结果和包围盒
  pub fn render(
    &self,
    image: &RasterImage,
    calibration: &[Point],
    segmentation: &Segmentation,
  ) -> RgbaImage {
    let mut canvas = image.as_rgba().clone();

    match segmentation {
      Segmentation::Mask(mask) => self.tint_mask(&mut canvas, mask),
      Segmentation::Polygon(polygon) => self.draw_outline(&mut canvas, polygon.points()),
    }

    // 包围盒两端都是像素坐标，边框包含两端像素
    if let Some(b) = segmentation.bounding_box() {
      let rect = Rect::at(b.min_x.floor() as i32, b.min_y.floor() as i32).of_size(
        b.span_x().ceil() as u32 + 1,
        b.span_y().ceil() as u32 + 1,
      );
      draw_hollow_rect_mut(&mut canvas, rect, Rgba(self.bbox_color));
    }

    self.draw_calibration(&mut canvas, calibration);
    canvas
  }

  pub fn snapshot(
    &self,
    image: &RasterImage,
    calibration: &[Point],
    segmentation: &Segmentation,
  ) -> Result<ImageSnapshot, MeasureError> {
    ImageSnapshot::encode(&self.render(image, calibration, segmentation))
  }

  fn tint_mask(&self, canvas: &mut RgbaImage, mask: &SegmentationMask) {
    let (w, h) = canvas.dimensions();
    let a = self.tint_alpha;
    for (x, y) in mask.flagged_pixels() {
      if x >= w || y >= h {
        continue;
      }
      let pixel = canvas.get_pixel_mut(x, y);
      for c in 0..3 {
        pixel[c] = (pixel[c] as f32 * (1.0 - a) + self.wound_tint[c] as f32 * a).round() as u8;
      }
    }
  }

  fn draw_outline(&self, canvas: &mut RgbaImage, points: &[Point]) {
    let color = Rgba(self.outline_color);
    for (i, p) in points.iter().enumerate() {
      let q = &points[(i + 1) % points.len()];
      draw_line_segment_mut(
        canvas,
        (p.x as f32, p.y as f32),
        (q.x as f32, q.y as f32),
        color,
      );
    }
    for p in points {
      self.draw_marker(canvas, p, color);
    }
  }

  fn draw_calibration(&self, canvas: &mut RgbaImage, points: &[Point]) {
    let color = Rgba(self.calibration_color);
    if let [p1, p2] = points {
      draw_line_segment_mut(
        canvas,
        (p1.x as f32, p1.y as f32),
        (p2.x as f32, p2.y as f32),
        color,
      );
    }
    for p in points {
      self.draw_marker(canvas, p, color);
    }
  }

  fn draw_marker(&self, canvas: &mut RgbaImage, p: &Point, color: Rgba<u8>) {
    draw_filled_circle_mut(
      canvas,
      (p.x.round() as i32, p.y.round() as i32),
      self.marker_radius,
      color,
    );
  }
}
