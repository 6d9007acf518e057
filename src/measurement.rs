// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/measurement.rs - 创面尺寸与指标计算
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

//! 由分割结果与比例尺得出长度、宽度、面积、周长与肉芽组织比例。
//!
//! 内部始终使用完整的浮点精度，只有 [`WoundMeasurement::rounded`]
//! 在展示时保留一位小数。

use std::f64::consts::PI;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
  calibration::PixelScale,
  config::{GranulationThresholds, PerimeterModel, PipelineConfig},
  error::MeasureError,
  frame::RasterImage,
  geometry::{self, BoundingBox, Point},
  segmentation::{Segmentation, SegmentationMask, Strategy},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WoundMeasurement {
  pub length_cm: f64,
  pub width_cm: f64,
  pub area_cm2: f64,
  pub perimeter_cm: f64,
  pub granulation_percent: Option<f64>,
  pub confidence: f64,
  pub method: Strategy,
  pub pixels_per_cm: f64,
  /// 自动路径为标记像素数，手动路径为多边形顶点数
  pub sample_count: u64,
  pub measured_at: DateTime<Utc>,
}

/// 展示用的一位小数结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSummary {
  pub length_cm: f64,
  pub width_cm: f64,
  pub area_cm2: f64,
  pub perimeter_cm: f64,
  pub granulation_percent: Option<f64>,
  pub confidence: f64,
}

pub fn round1(value: f64) -> f64 {
  (value * 10.0).round() / 10.0
}

impl WoundMeasurement {
  pub fn rounded(&self) -> MeasurementSummary {
    MeasurementSummary {
      length_cm: round1(self.length_cm),
      width_cm: round1(self.width_cm),
      area_cm2: round1(self.area_cm2),
      perimeter_cm: round1(self.perimeter_cm),
      granulation_percent: self.granulation_percent.map(round1),
      confidence: self.confidence,
    }
  }
}

impl fmt::Display for MeasurementSummary {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "长 {:.1} cm, 宽 {:.1} cm, 面积 {:.1} cm², 周长 {:.1} cm",
      self.length_cm, self.width_cm, self.area_cm2, self.perimeter_cm
    )?;
    if let Some(g) = self.granulation_percent {
      write!(f, ", 肉芽组织 {:.1}%", g)?;
    }
    write!(f, ", 置信度 {:.0}%", self.confidence * 100.0)
  }
}

/// 椭圆周长近似，不是真实的边界长度
pub fn approximate_perimeter(model: PerimeterModel, length: f64, width: f64) -> f64 {
  match model {
    PerimeterModel::GeometricMeanEllipse => 2.0 * PI * ((length * width) / 2.0).sqrt(),
    PerimeterModel::Ramanujan => {
      let (a, b) = (length / 2.0, width / 2.0);
      if a + b <= 0.0 {
        return 0.0;
      }
      let h = ((a - b) / (a + b)).powi(2);
      PI * (a + b) * (1.0 + 3.0 * h / (10.0 + (4.0 - 3.0 * h).sqrt()))
    }
  }
}

/// 健康肉芽组织的颜色规则，同样是启发式的
pub fn is_granulation_pixel(pixel: [u8; 4], thresholds: &GranulationThresholds) -> bool {
  let [r, g, b, _] = pixel;
  r > thresholds.red_min
    && r as f32 > thresholds.red_over_green * g as f32
    && g > b
    && g > thresholds.green_min
}

fn granulation_percent(
  image: &RasterImage,
  mask: &SegmentationMask,
  thresholds: &GranulationThresholds,
) -> Option<f64> {
  if !thresholds.enabled || mask.is_empty() {
    return None;
  }
  let healthy = mask
    .flagged_pixels()
    .filter(|&(x, y)| is_granulation_pixel(image.pixel(x, y), thresholds))
    .count();
  Some(healthy as f64 / mask.flagged_count() as f64 * 100.0)
}

/// 自动路径：由像素掩码计算
pub fn measure_from_mask(
  image: &RasterImage,
  mask: &SegmentationMask,
  scale: PixelScale,
  config: &PipelineConfig,
) -> Result<WoundMeasurement, MeasureError> {
  if image.dimensions() != (mask.width(), mask.height()) {
    return Err(MeasureError::invalid_input(format!(
      "掩码尺寸 {}x{} 与图像尺寸 {}x{} 不一致",
      mask.width(),
      mask.height(),
      image.width(),
      image.height()
    )));
  }
  let bbox = mask
    .bounding_box()
    .ok_or_else(|| MeasureError::undefined("未检测到创面组织像素"))?;

  let length_cm = scale.to_cm(bbox.height_px() as f64);
  let width_cm = scale.to_cm(bbox.width_px() as f64);
  let area_cm2 = scale.to_cm2(mask.flagged_count() as f64);
  let perimeter_cm = approximate_perimeter(config.perimeter_model, length_cm, width_cm);
  let granulation = granulation_percent(image, mask, &config.granulation);

  debug!(
    "掩码测量: 像素 {}, 包围盒 {}x{} px",
    mask.flagged_count(),
    bbox.width_px(),
    bbox.height_px()
  );

  let measurement = WoundMeasurement {
    length_cm,
    width_cm,
    area_cm2,
    perimeter_cm,
    granulation_percent: granulation,
    confidence: config.confidence.automatic,
    method: Strategy::Automatic,
    pixels_per_cm: scale.pixels_per_cm(),
    sample_count: mask.flagged_count(),
    measured_at: Utc::now(),
  };
  info!("自动测量结果: {}", measurement.rounded());
  Ok(measurement)
}

/// 手动路径：由闭合多边形计算
pub fn measure_from_polygon(
  points: &[Point],
  scale: PixelScale,
  config: &PipelineConfig,
) -> Result<WoundMeasurement, MeasureError> {
  if let Some(p) = points.iter().find(|p| !p.is_finite()) {
    return Err(MeasureError::undefined(format!(
      "多边形顶点坐标不是有限数值: ({}, {})",
      p.x, p.y
    )));
  }
  let distinct = geometry::distinct_count(points);
  if distinct < 3 {
    return Err(MeasureError::undefined(format!(
      "多边形只有 {} 个不同的顶点",
      distinct
    )));
  }
  let area_px = geometry::polygon_area(points);
  if !area_px.is_finite() || area_px == 0.0 {
    return Err(MeasureError::undefined(format!("多边形面积无效: {}", area_px)));
  }
  let bbox = BoundingBox::of_points(points)
    .ok_or_else(|| MeasureError::undefined("多边形没有顶点"))?;

  let measurement = WoundMeasurement {
    length_cm: scale.to_cm(bbox.span_y()),
    width_cm: scale.to_cm(bbox.span_x()),
    area_cm2: scale.to_cm2(area_px),
    perimeter_cm: scale.to_cm(geometry::polygon_perimeter(points)),
    granulation_percent: None,
    confidence: config.confidence.manual,
    method: Strategy::Manual,
    pixels_per_cm: scale.pixels_per_cm(),
    sample_count: points.len() as u64,
    measured_at: Utc::now(),
  };
  info!("手动测量结果: {}", measurement.rounded());
  Ok(measurement)
}

pub fn measure(
  image: &RasterImage,
  segmentation: &Segmentation,
  scale: PixelScale,
  config: &PipelineConfig,
) -> Result<WoundMeasurement, MeasureError> {
  match segmentation {
    Segmentation::Mask(mask) => measure_from_mask(image, mask, scale, config),
    Segmentation::Polygon(polygon) => measure_from_polygon(polygon.points(), scale, config),
  }
}
