// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/segmentation.rs - 创面组织分割
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

//! 两种互斥的分割策略：基于颜色阈值的自动分割，以及用户手动描边。

use serde::{Deserialize, Serialize};

use crate::geometry::{self, BoundingBox, Point};

mod automatic;
mod manual;

pub use self::automatic::{
  AutomaticSegmenter, AutomaticState, JobToken, SegmentationJob, SegmentationOutcome, classify,
  is_wound_pixel,
};
pub use self::manual::{ManualState, ManualTracer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
  Automatic,
  Manual,
}

/// 像素包围盒，边界包含在内
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
  pub min_x: u32,
  pub min_y: u32,
  pub max_x: u32,
  pub max_y: u32,
}

impl PixelBox {
  pub fn width_px(&self) -> u32 {
    self.max_x - self.min_x + 1
  }

  pub fn height_px(&self) -> u32 {
    self.max_y - self.min_y + 1
  }

  fn include(&mut self, x: u32, y: u32) {
    self.min_x = self.min_x.min(x);
    self.min_y = self.min_y.min(y);
    self.max_x = self.max_x.max(x);
    self.max_y = self.max_y.max(y);
  }
}

/// 逐像素的“是否为创面组织”标记
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
  width: u32,
  height: u32,
  bits: Vec<bool>,
  flagged: u64,
  bbox: Option<PixelBox>,
}

impl SegmentationMask {
  /// `bits` 按行优先排列，长度必须为 width × height
  pub(crate) fn from_bits(width: u32, height: u32, bits: Vec<bool>) -> Self {
    debug_assert_eq!(bits.len(), width as usize * height as usize);
    let mut flagged = 0u64;
    let mut bbox: Option<PixelBox> = None;
    for (i, _) in bits.iter().enumerate().filter(|(_, b)| **b) {
      let x = (i % width as usize) as u32;
      let y = (i / width as usize) as u32;
      flagged += 1;
      match bbox.as_mut() {
        Some(b) => b.include(x, y),
        None => {
          bbox = Some(PixelBox {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
          })
        }
      }
    }
    Self {
      width,
      height,
      bits,
      flagged,
      bbox,
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn is_flagged(&self, x: u32, y: u32) -> bool {
    if x >= self.width || y >= self.height {
      return false;
    }
    self.bits[y as usize * self.width as usize + x as usize]
  }

  pub fn flagged_count(&self) -> u64 {
    self.flagged
  }

  pub fn is_empty(&self) -> bool {
    self.flagged == 0
  }

  pub fn bounding_box(&self) -> Option<PixelBox> {
    self.bbox
  }

  pub fn flagged_pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
    let width = self.width as usize;
    self
      .bits
      .iter()
      .enumerate()
      .filter(|(_, b)| **b)
      .map(move |(i, _)| ((i % width) as u32, (i / width) as u32))
  }
}

/// 手动描出的闭合多边形，按点击顺序连接并回到起点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WoundPolygon {
  points: Vec<Point>,
}

impl WoundPolygon {
  pub(crate) fn new(points: Vec<Point>) -> Self {
    Self { points }
  }

  pub fn points(&self) -> &[Point] {
    &self.points
  }

  pub fn area_px(&self) -> f64 {
    geometry::polygon_area(&self.points)
  }

  pub fn bounding_box(&self) -> Option<BoundingBox> {
    BoundingBox::of_points(&self.points)
  }
}

/// 分割阶段的最终产出
#[derive(Debug, Clone, PartialEq)]
pub enum Segmentation {
  Mask(SegmentationMask),
  Polygon(WoundPolygon),
}

impl Segmentation {
  pub fn strategy(&self) -> Strategy {
    match self {
      Segmentation::Mask(_) => Strategy::Automatic,
      Segmentation::Polygon(_) => Strategy::Manual,
    }
  }

  /// 以像素为单位的面积
  pub fn area_px(&self) -> f64 {
    match self {
      Segmentation::Mask(mask) => mask.flagged_count() as f64,
      Segmentation::Polygon(polygon) => polygon.area_px(),
    }
  }

  pub fn bounding_box(&self) -> Option<BoundingBox> {
    match self {
      Segmentation::Mask(mask) => mask.bounding_box().map(|b| BoundingBox {
        min_x: b.min_x as f64,
        min_y: b.min_y as f64,
        max_x: b.max_x as f64,
        max_y: b.max_y as f64,
      }),
      Segmentation::Polygon(polygon) => polygon.bounding_box(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mask_tracks_count_and_extent() {
    // 4x3，标记 (1,0) (2,2) (3,1)
    let mut bits = vec![false; 12];
    bits[1] = true;
    bits[2 * 4 + 2] = true;
    bits[4 + 3] = true;
    let mask = SegmentationMask::from_bits(4, 3, bits);
    assert_eq!(mask.flagged_count(), 3);
    let bbox = mask.bounding_box().unwrap();
    assert_eq!(
      bbox,
      PixelBox {
        min_x: 1,
        min_y: 0,
        max_x: 3,
        max_y: 2
      }
    );
    assert_eq!(bbox.width_px(), 3);
    assert_eq!(bbox.height_px(), 3);
    assert!(mask.is_flagged(3, 1));
    assert!(!mask.is_flagged(0, 0));
    assert!(!mask.is_flagged(40, 0));
    let flagged: Vec<_> = mask.flagged_pixels().collect();
    assert_eq!(flagged, vec![(1, 0), (3, 1), (2, 2)]);
  }

  #[test]
  fn empty_mask_has_no_extent() {
    let mask = SegmentationMask::from_bits(2, 2, vec![false; 4]);
    assert!(mask.is_empty());
    assert!(mask.bounding_box().is_none());
    assert!(Segmentation::Mask(mask).bounding_box().is_none());
  }

  #[test]
  fn polygon_segmentation_reports_shoelace_area() {
    let polygon = WoundPolygon::new(vec![
      Point::new(0.0, 0.0),
      Point::new(30.0, 0.0),
      Point::new(0.0, 40.0),
    ]);
    let seg = Segmentation::Polygon(polygon);
    assert_eq!(seg.strategy(), Strategy::Manual);
    assert_eq!(seg.area_px(), 600.0);
  }
}
