// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/config.rs - 流程参数配置
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

//! 测量流程的全部可调参数。
//!
//! 分割阈值、肉芽组织阈值、周长近似模型与置信度都是经验值，
//! 没有临床验证，因此全部放在配置中，而不是写死在算法里。

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("配置项 {field} 无效: {reason}")]
  Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub camera: CameraConfig,
  pub segmentation: SegmentationThresholds,
  pub granulation: GranulationThresholds,
  pub confidence: ConfidencePolicy,
  pub perimeter_model: PerimeterModel,
}

/// 摄像头期望分辨率，设备不支持时接受更低的分辨率
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
  pub ideal_width: u32,
  pub ideal_height: u32,
}

impl Default for CameraConfig {
  fn default() -> Self {
    Self {
      ideal_width: 1920,
      ideal_height: 1080,
    }
  }
}

/// 自动分割的颜色阈值，通道已归一化到 [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationThresholds {
  pub red_min: f32,
  pub green_max: f32,
  pub blue_max: f32,
  /// 超过该像素数的图像直接判定为自动分割失败
  pub max_pixels: u64,
}

impl Default for SegmentationThresholds {
  fn default() -> Self {
    Self {
      red_min: 0.35,
      green_max: 0.6,
      blue_max: 0.6,
      max_pixels: 50_000_000,
    }
  }
}

/// 健康肉芽组织判定阈值，使用 0-255 的绝对通道值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GranulationThresholds {
  pub enabled: bool,
  pub red_min: u8,
  pub red_over_green: f32,
  pub green_min: u8,
}

impl Default for GranulationThresholds {
  fn default() -> Self {
    Self {
      enabled: true,
      red_min: 180,
      red_over_green: 1.2,
      green_min: 50,
    }
  }
}

/// 置信度策略。自动路径的值只是占位，并非来自模型不确定度。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidencePolicy {
  pub automatic: f64,
  pub manual: f64,
}

impl Default for ConfidencePolicy {
  fn default() -> Self {
    Self {
      automatic: 0.85,
      manual: 0.95,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerimeterModel {
  /// 2π·sqrt((L·W)/2)
  #[default]
  GeometricMeanEllipse,
  /// Ramanujan 第二近似式，半轴取 L/2 与 W/2
  Ramanujan,
}

impl PipelineConfig {
  pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
    debug!("读取配置文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Self::from_json_str(&text)
  }

  pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
    let config: PipelineConfig = serde_json::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn to_json_string(&self) -> Result<String, ConfigError> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let unit = |field: &'static str, v: f64| {
      if v.is_finite() && (0.0..=1.0).contains(&v) {
        Ok(())
      } else {
        Err(ConfigError::Invalid {
          field,
          reason: format!("{} 不在 [0, 1] 区间内", v),
        })
      }
    };

    unit("segmentation.red_min", self.segmentation.red_min as f64)?;
    unit("segmentation.green_max", self.segmentation.green_max as f64)?;
    unit("segmentation.blue_max", self.segmentation.blue_max as f64)?;
    unit("confidence.automatic", self.confidence.automatic)?;
    unit("confidence.manual", self.confidence.manual)?;

    if self.segmentation.max_pixels == 0 {
      return Err(ConfigError::Invalid {
        field: "segmentation.max_pixels",
        reason: "必须大于 0".to_string(),
      });
    }
    let ratio = self.granulation.red_over_green;
    if !ratio.is_finite() || ratio <= 0.0 {
      return Err(ConfigError::Invalid {
        field: "granulation.red_over_green",
        reason: format!("{} 必须为正数", ratio),
      });
    }
    if self.camera.ideal_width == 0 || self.camera.ideal_height == 0 {
      return Err(ConfigError::Invalid {
        field: "camera",
        reason: "期望分辨率不能为 0".to_string(),
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    let config = PipelineConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.segmentation.red_min, 0.35);
    assert_eq!(config.granulation.red_min, 180);
    assert_eq!(config.perimeter_model, PerimeterModel::GeometricMeanEllipse);
  }

  #[test]
  fn partial_json_keeps_other_defaults() {
    let config = PipelineConfig::from_json_str(
      r#"{ "confidence": { "automatic": 0.5 }, "perimeter_model": "ramanujan" }"#,
    )
    .unwrap();
    assert_eq!(config.confidence.automatic, 0.5);
    assert_eq!(config.confidence.manual, 0.95);
    assert_eq!(config.perimeter_model, PerimeterModel::Ramanujan);
    assert_eq!(config.camera.ideal_width, 1920);
  }

  #[test]
  fn out_of_range_threshold_is_rejected() {
    let err = PipelineConfig::from_json_str(r#"{ "segmentation": { "red_min": 1.5 } }"#)
      .unwrap_err();
    assert!(matches!(
      err,
      ConfigError::Invalid {
        field: "segmentation.red_min",
        ..
      }
    ));
  }

  #[test]
  fn json_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let mut config = PipelineConfig::default();
    config.granulation.enabled = false;
    std::fs::write(&path, config.to_json_string().unwrap()).unwrap();
    let loaded = PipelineConfig::from_json_file(&path).unwrap();
    assert_eq!(loaded, config);
  }
}
