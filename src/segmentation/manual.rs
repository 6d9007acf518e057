// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/segmentation/manual.rs - 手动描边
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

use tracing::{debug, info};

use crate::{error::MeasureError, geometry::Point};

use super::WoundPolygon;

const MIN_POLYGON_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualState {
  CollectingPoints,
  /// 已有至少 3 个点，可以闭合
  Ready,
}

/// 按点击顺序收集边界点，不排序也不去重
#[derive(Debug, Clone)]
pub struct ManualTracer {
  max_x: f64,
  max_y: f64,
  points: Vec<Point>,
}

impl ManualTracer {
  pub fn new(image_width: u32, image_height: u32) -> Self {
    Self {
      max_x: image_width.saturating_sub(1) as f64,
      max_y: image_height.saturating_sub(1) as f64,
      points: Vec::new(),
    }
  }

  pub fn state(&self) -> ManualState {
    if self.points.len() >= MIN_POLYGON_POINTS {
      ManualState::Ready
    } else {
      ManualState::CollectingPoints
    }
  }

  pub fn points(&self) -> &[Point] {
    &self.points
  }

  /// 超出图像范围的坐标限制到边缘，非有限坐标直接拒绝
  pub fn add_boundary_point(&mut self, x: f64, y: f64) -> Result<Point, MeasureError> {
    let point = Point::new(x, y).clamped(self.max_x, self.max_y)?;
    self.points.push(point);
    debug!(
      "边界点 #{}: ({:.1}, {:.1})",
      self.points.len(),
      point.x,
      point.y
    );
    Ok(point)
  }

  pub fn clear_boundary_points(&mut self) {
    self.points.clear();
  }

  pub fn finalize_polygon(&self) -> Result<WoundPolygon, MeasureError> {
    if self.points.len() < MIN_POLYGON_POINTS {
      return Err(MeasureError::InsufficientInput {
        required: MIN_POLYGON_POINTS,
        actual: self.points.len(),
      });
    }
    info!("闭合手动描边, 共 {} 个点", self.points.len());
    Ok(WoundPolygon::new(self.points.clone()))
  }
}
