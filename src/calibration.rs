// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/calibration.rs - 参照物标定
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

//! 通过参照物上的两个点击点建立像素与厘米的换算关系。
//!
//! 标定只依赖参照物的物理长度，参照物名称不参与计算。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{error::MeasureError, geometry::Point};

/// 两点距离小于该值视为重合
const COINCIDENT_EPSILON_PX: f64 = 1e-9;

/// 参照物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSpec {
  Naira1Coin,
  Naira2Coin,
  UsQuarter,
  Euro1Coin,
  RulerCentimeter,
  IdCard,
  /// 用户自行输入物理长度（厘米）
  Custom(Option<f64>),
}

impl ReferenceSpec {
  pub const NAMED: [ReferenceSpec; 6] = [
    ReferenceSpec::Naira1Coin,
    ReferenceSpec::Naira2Coin,
    ReferenceSpec::UsQuarter,
    ReferenceSpec::Euro1Coin,
    ReferenceSpec::RulerCentimeter,
    ReferenceSpec::IdCard,
  ];

  pub fn label(&self) -> &'static str {
    match self {
      ReferenceSpec::Naira1Coin => "₦1 Coin",
      ReferenceSpec::Naira2Coin => "₦2 Coin",
      ReferenceSpec::UsQuarter => "US Quarter",
      ReferenceSpec::Euro1Coin => "€1 Coin",
      ReferenceSpec::RulerCentimeter => "1 cm Ruler Mark",
      ReferenceSpec::IdCard => "ID Card (long edge)",
      ReferenceSpec::Custom(_) => "Custom",
    }
  }

  /// 参照物物理长度，自定义长度缺失或非正数时报 `InvalidInput`
  pub fn length_cm(&self) -> Result<f64, MeasureError> {
    match self {
      ReferenceSpec::Naira1Coin => Ok(2.2),
      ReferenceSpec::Naira2Coin => Ok(2.5),
      ReferenceSpec::UsQuarter => Ok(2.426),
      ReferenceSpec::Euro1Coin => Ok(2.325),
      ReferenceSpec::RulerCentimeter => Ok(1.0),
      ReferenceSpec::IdCard => Ok(8.56),
      ReferenceSpec::Custom(None) => {
        Err(MeasureError::invalid_input("未填写自定义参照物长度"))
      }
      ReferenceSpec::Custom(Some(len)) if !len.is_finite() || *len <= 0.0 => Err(
        MeasureError::invalid_input(format!("自定义参照物长度必须为正数, 实际为 {}", len)),
      ),
      ReferenceSpec::Custom(Some(len)) => Ok(*len),
    }
  }
}

impl fmt::Display for ReferenceSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ReferenceSpec::Custom(Some(len)) => write!(f, "Custom ({} cm)", len),
      other => f.write_str(other.label()),
    }
  }
}

impl FromStr for ReferenceSpec {
  type Err = MeasureError;

  /// 接受 `naira-1`、`naira-2`、`quarter`、`euro-1`、`ruler`、`id-card`
  /// 或 `custom:<厘米>`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_lowercase();
    match lower.as_str() {
      "naira-1" => Ok(ReferenceSpec::Naira1Coin),
      "naira-2" => Ok(ReferenceSpec::Naira2Coin),
      "quarter" => Ok(ReferenceSpec::UsQuarter),
      "euro-1" => Ok(ReferenceSpec::Euro1Coin),
      "ruler" => Ok(ReferenceSpec::RulerCentimeter),
      "id-card" => Ok(ReferenceSpec::IdCard),
      "custom" => Ok(ReferenceSpec::Custom(None)),
      _ => match lower.strip_prefix("custom:") {
        Some(value) => value
          .trim()
          .parse::<f64>()
          .map(|len| ReferenceSpec::Custom(Some(len)))
          .map_err(|e| MeasureError::invalid_input(format!("无法解析参照物长度 '{}': {}", value, e))),
        None => Err(MeasureError::invalid_input(format!("未知参照物: {}", s))),
      },
    }
  }
}

/// 每厘米像素数，构造时保证为有限正数
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct PixelScale(f64);

impl PixelScale {
  pub fn new(pixels_per_cm: f64) -> Result<Self, MeasureError> {
    if pixels_per_cm.is_finite() && pixels_per_cm > 0.0 {
      Ok(Self(pixels_per_cm))
    } else {
      Err(MeasureError::CalibrationDegenerate(format!(
        "比例尺必须为有限正数, 实际为 {}",
        pixels_per_cm
      )))
    }
  }

  pub fn pixels_per_cm(&self) -> f64 {
    self.0
  }

  pub fn to_cm(&self, pixels: f64) -> f64 {
    pixels / self.0
  }

  pub fn to_cm2(&self, square_pixels: f64) -> f64 {
    square_pixels / (self.0 * self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointOutcome {
  Recorded { index: usize, point: Point },
  /// 已有两个点，需先重置
  Ignored,
}

#[derive(Debug, Clone)]
pub struct Calibration {
  max_x: f64,
  max_y: f64,
  reference: ReferenceSpec,
  points: Vec<Point>,
  scale: Option<PixelScale>,
}

impl Calibration {
  pub fn new(image_width: u32, image_height: u32, reference: ReferenceSpec) -> Self {
    Self {
      max_x: image_width.saturating_sub(1) as f64,
      max_y: image_height.saturating_sub(1) as f64,
      reference,
      points: Vec::with_capacity(2),
      scale: None,
    }
  }

  pub fn reference(&self) -> &ReferenceSpec {
    &self.reference
  }

  pub fn points(&self) -> &[Point] {
    &self.points
  }

  pub fn scale(&self) -> Option<PixelScale> {
    self.scale
  }

  pub fn select_reference(&mut self, reference: ReferenceSpec) {
    debug!("切换参照物: {}", reference);
    self.reference = reference;
    self.scale = None;
  }

  /// 记录一个标定点，超出图像范围的坐标会被限制到边缘
  pub fn record_point(&mut self, x: f64, y: f64) -> Result<PointOutcome, MeasureError> {
    if self.points.len() >= 2 {
      debug!("已有两个标定点, 忽略点击 ({:.1}, {:.1})", x, y);
      return Ok(PointOutcome::Ignored);
    }
    let point = Point::new(x, y).clamped(self.max_x, self.max_y)?;
    self.points.push(point);
    Ok(PointOutcome::Recorded {
      index: self.points.len() - 1,
      point,
    })
  }

  pub fn compute_scale(&mut self) -> Result<PixelScale, MeasureError> {
    let length_cm = self.reference.length_cm()?;

    let [p1, p2] = self.points[..] else {
      return Err(MeasureError::InsufficientInput {
        required: 2,
        actual: self.points.len(),
      });
    };

    let distance = p1.distance_to(&p2);
    if distance <= COINCIDENT_EPSILON_PX {
      return Err(MeasureError::CalibrationDegenerate(
        "两个标定点重合".to_string(),
      ));
    }

    let scale = PixelScale::new(distance / length_cm)?;
    info!(
      "标定完成: {} = {:.3} cm, 距离 {:.2} px, 比例尺 {:.4} px/cm",
      self.reference.label(),
      length_cm,
      distance,
      scale.pixels_per_cm()
    );
    self.scale = Some(scale);
    Ok(scale)
  }

  pub fn reset(&mut self) {
    self.points.clear();
    self.scale = None;
  }
}
