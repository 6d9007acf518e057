// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/geometry.rs - 平面几何工具
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

use serde::{Deserialize, Serialize};

use crate::error::MeasureError;

/// 图像像素坐标，x 向右，y 向下
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
  pub x: f64,
  pub y: f64,
}

impl Point {
  pub const fn new(x: f64, y: f64) -> Self {
    Self { x, y }
  }

  pub fn distance_to(&self, other: &Point) -> f64 {
    (self.x - other.x).hypot(self.y - other.y)
  }

  pub fn is_finite(&self) -> bool {
    self.x.is_finite() && self.y.is_finite()
  }

  /// 将坐标限制在 [0, max_x] × [0, max_y] 内，NaN 或无穷坐标直接拒绝
  pub fn clamped(self, max_x: f64, max_y: f64) -> Result<Self, MeasureError> {
    if !self.is_finite() {
      return Err(MeasureError::invalid_input(format!(
        "坐标不是有限数值: ({}, {})",
        self.x, self.y
      )));
    }
    Ok(Self {
      x: self.x.clamp(0.0, max_x),
      y: self.y.clamp(0.0, max_y),
    })
  }
}

impl From<(f64, f64)> for Point {
  fn from((x, y): (f64, f64)) -> Self {
    Self { x, y }
  }
}

/// 轴对齐包围盒 [min_x, min_y, max_x, max_y]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub min_x: f64,
  pub min_y: f64,
  pub max_x: f64,
  pub max_y: f64,
}

impl BoundingBox {
  pub fn of_points(points: &[Point]) -> Option<Self> {
    let first = points.first()?;
    let init = BoundingBox {
      min_x: first.x,
      min_y: first.y,
      max_x: first.x,
      max_y: first.y,
    };
    Some(points.iter().skip(1).fold(init, |b, p| BoundingBox {
      min_x: b.min_x.min(p.x),
      min_y: b.min_y.min(p.y),
      max_x: b.max_x.max(p.x),
      max_y: b.max_y.max(p.y),
    }))
  }

  /// 顶点包围盒的宽度 (max - min)
  pub fn span_x(&self) -> f64 {
    self.max_x - self.min_x
  }

  pub fn span_y(&self) -> f64 {
    self.max_y - self.min_y
  }
}

/// Shoelace 有向和 Σ(x_i·y_{i+1} − x_{i+1}·y_i)，点序列视为闭合
pub fn shoelace_sum(points: &[Point]) -> f64 {
  cyclic_edges(points)
    .map(|(a, b)| a.x * b.y - b.x * a.y)
    .sum()
}

/// 多边形面积，自交多边形按有向面积的约定计算
pub fn polygon_area(points: &[Point]) -> f64 {
  shoelace_sum(points).abs() / 2.0
}

/// 闭合路径的总边长
pub fn polygon_perimeter(points: &[Point]) -> f64 {
  cyclic_edges(points).map(|(a, b)| a.distance_to(b)).sum()
}

/// 不重复的顶点数量
pub fn distinct_count(points: &[Point]) -> usize {
  let mut seen: Vec<Point> = Vec::with_capacity(points.len());
  for p in points {
    if !seen.iter().any(|q| q.x == p.x && q.y == p.y) {
      seen.push(*p);
    }
  }
  seen.len()
}

fn cyclic_edges(points: &[Point]) -> impl Iterator<Item = (&Point, &Point)> {
  let n = points.len();
  (0..n).map(move |i| (&points[i], &points[(i + 1) % n]))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rect() -> Vec<Point> {
    vec![
      Point::new(0.0, 0.0),
      Point::new(100.0, 0.0),
      Point::new(100.0, 60.0),
      Point::new(0.0, 60.0),
    ]
  }

  #[test]
  fn rectangle_area_and_perimeter() {
    let pts = rect();
    assert_eq!(polygon_area(&pts), 6000.0);
    assert_eq!(polygon_perimeter(&pts), 320.0);
  }

  #[test]
  fn winding_order_does_not_change_area() {
    let mut pts = rect();
    pts.reverse();
    assert!(shoelace_sum(&pts) < 0.0);
    assert_eq!(polygon_area(&pts), 6000.0);
  }

  #[test]
  fn bowtie_cancels_out() {
    // 自交的“蝴蝶结”形状，两半的有向面积相互抵消
    let pts = vec![
      Point::new(0.0, 0.0),
      Point::new(10.0, 10.0),
      Point::new(10.0, 0.0),
      Point::new(0.0, 10.0),
    ];
    assert_eq!(polygon_area(&pts), 0.0);
  }

  #[test]
  fn bounding_box_spans() {
    let bbox = BoundingBox::of_points(&rect()).unwrap();
    assert_eq!(bbox.span_x(), 100.0);
    assert_eq!(bbox.span_y(), 60.0);
    assert!(BoundingBox::of_points(&[]).is_none());
  }

  #[test]
  fn distinct_count_ignores_repeats() {
    let pts = vec![
      Point::new(1.0, 1.0),
      Point::new(1.0, 1.0),
      Point::new(2.0, 3.0),
    ];
    assert_eq!(distinct_count(&pts), 2);
  }

  #[test]
  fn clamp_keeps_inside_extent() {
    let p = Point::new(-5.0, 120.0).clamped(99.0, 99.0).unwrap();
    assert_eq!(p, Point::new(0.0, 99.0));
  }

  #[test]
  fn clamp_rejects_non_finite() {
    for p in [
      Point::new(f64::NAN, 1.0),
      Point::new(1.0, f64::NAN),
      Point::new(f64::INFINITY, 1.0),
      Point::new(1.0, f64::NEG_INFINITY),
    ] {
      assert!(matches!(
        p.clamped(99.0, 99.0),
        Err(MeasureError::InvalidInput(_))
      ));
    }
  }
}
