// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/error.rs - 测量流程错误分类
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

use thiserror::Error;

/// 测量流程中的所有错误均可在本地恢复，最坏情况是回到更早的阶段。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasureError {
  #[error("输入无效: {0}")]
  InvalidInput(String),
  #[error("设备不可用: {0}")]
  DeviceUnavailable(String),
  #[error("标定退化: {0}")]
  CalibrationDegenerate(String),
  #[error("输入不足: 需要至少 {required} 个点, 当前只有 {actual} 个")]
  InsufficientInput { required: usize, actual: usize },
  #[error("无法得出测量结果: {0}")]
  MeasurementUndefined(String),
  #[error("自动分割失败: {0}")]
  SegmentationFailed(String),
  #[error("当前阶段 {stage} 不允许操作 {action}")]
  InvalidStage {
    stage: &'static str,
    action: &'static str,
  },
}

/// 界面针对每类错误给出的补救方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
  /// 换一张图片
  ChooseAnotherImage,
  /// 摄像头不可用，改为上传文件
  UseFileUpload,
  /// 重新选择参照物或重新点击标定点
  RecalibrateReference,
  /// 继续添加点
  AddMorePoints,
  /// 切换到手动描边
  SwitchToManual,
  /// 回到合适的阶段重新操作
  RestartStage,
}

impl MeasureError {
  pub fn remediation(&self) -> Remediation {
    match self {
      MeasureError::InvalidInput(_) => Remediation::ChooseAnotherImage,
      MeasureError::DeviceUnavailable(_) => Remediation::UseFileUpload,
      MeasureError::CalibrationDegenerate(_) => Remediation::RecalibrateReference,
      MeasureError::InsufficientInput { .. } => Remediation::AddMorePoints,
      MeasureError::MeasurementUndefined(_) | MeasureError::SegmentationFailed(_) => {
        Remediation::SwitchToManual
      }
      MeasureError::InvalidStage { .. } => Remediation::RestartStage,
    }
  }

  pub fn invalid_input(msg: impl Into<String>) -> Self {
    MeasureError::InvalidInput(msg.into())
  }

  pub fn undefined(msg: impl Into<String>) -> Self {
    MeasureError::MeasurementUndefined(msg.into())
  }
}

impl From<image::ImageError> for MeasureError {
  fn from(err: image::ImageError) -> Self {
    MeasureError::InvalidInput(format!("图像解码错误: {}", err))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn camera_failure_points_to_file_upload() {
    let err = MeasureError::DeviceUnavailable("permission denied".into());
    assert_eq!(err.remediation(), Remediation::UseFileUpload);
  }

  #[test]
  fn segmentation_failure_offers_manual_tracing() {
    let err = MeasureError::SegmentationFailed("too large".into());
    assert_eq!(err.remediation(), Remediation::SwitchToManual);
  }

  #[test]
  fn insufficient_input_message_names_counts() {
    let err = MeasureError::InsufficientInput {
      required: 3,
      actual: 2,
    };
    let text = err.to_string();
    assert!(text.contains('3'));
    assert!(text.contains('2'));
  }
}
