// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/segmentation/automatic.rs - 颜色阈值自动分割
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

//! 启发式颜色阈值分类器，并非训练得到的模型。
//!
//! 红色通道高于阈值且绿、蓝通道低于阈值的像素判定为创面组织，
//! 用于粗略区分偏红/粉色的组织与皮肤、背景。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{config::SegmentationThresholds, error::MeasureError, frame::RasterImage};

use super::SegmentationMask;

/// 分割任务标识：分割器代次与该分割器内的尝试序号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobToken {
  pub generation: u64,
  pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutomaticState {
  AwaitingRun,
  Running(JobToken),
  Done(SegmentationMask),
  Failed(String),
}

impl AutomaticState {
  pub fn name(&self) -> &'static str {
    match self {
      AutomaticState::AwaitingRun => "awaiting_run",
      AutomaticState::Running(_) => "running",
      AutomaticState::Done(_) => "done",
      AutomaticState::Failed(_) => "failed",
    }
  }
}

/// 可交给其他线程执行的分割任务
#[derive(Debug, Clone)]
pub struct SegmentationJob {
  token: JobToken,
  image: Arc<RasterImage>,
  thresholds: SegmentationThresholds,
}

impl SegmentationJob {
  pub fn token(&self) -> JobToken {
    self.token
  }

  pub fn run(self) -> SegmentationOutcome {
    let result = classify(&self.image, &self.thresholds);
    SegmentationOutcome {
      token: self.token,
      image: self.image,
      result,
    }
  }
}

/// 任务结果，带着发起它的任务标识和输入图像
#[derive(Debug)]
pub struct SegmentationOutcome {
  token: JobToken,
  image: Arc<RasterImage>,
  result: Result<SegmentationMask, MeasureError>,
}

impl SegmentationOutcome {
  pub fn token(&self) -> JobToken {
    self.token
  }
}

pub fn is_wound_pixel(pixel: [u8; 4], thresholds: &SegmentationThresholds) -> bool {
  let [r, g, b, a] = pixel;
  if a == 0 {
    return false;
  }
  let (r, g, b) = (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0);
  r > thresholds.red_min && g < thresholds.green_max && b < thresholds.blue_max
}

/// 对整幅图像逐像素分类，完整构建掩码后一次性返回
pub fn classify(
  image: &RasterImage,
  thresholds: &SegmentationThresholds,
) -> Result<SegmentationMask, MeasureError> {
  let (width, height) = image.dimensions();
  let pixel_count = image.pixel_count();
  if pixel_count > thresholds.max_pixels {
    return Err(MeasureError::SegmentationFailed(format!(
      "图像过大: {}x{} 超过 {} 像素上限",
      width, height, thresholds.max_pixels
    )));
  }

  let len = usize::try_from(pixel_count)
    .map_err(|_| MeasureError::SegmentationFailed("像素数超出地址空间".to_string()))?;
  let mut bits = Vec::new();
  bits
    .try_reserve_exact(len)
    .map_err(|e| MeasureError::SegmentationFailed(format!("无法分配掩码内存: {}", e)))?;
  bits.extend(image.rgba_pixels().map(|p| is_wound_pixel(p, thresholds)));

  let mask = SegmentationMask::from_bits(width, height, bits);
  debug!(
    "自动分割: {}x{}, 标记像素 {}",
    width,
    height,
    mask.flagged_count()
  );
  Ok(mask)
}

#[derive(Debug)]
pub struct AutomaticSegmenter {
  image: Arc<RasterImage>,
  thresholds: SegmentationThresholds,
  generation: u64,
  attempts: u32,
  state: AutomaticState,
}

impl AutomaticSegmenter {
  pub fn new(image: Arc<RasterImage>, thresholds: SegmentationThresholds) -> Self {
    Self::with_generation(image, thresholds, 0)
  }

  /// 同一会话内每次重新选择自动分割都应使用新的代次
  pub fn with_generation(
    image: Arc<RasterImage>,
    thresholds: SegmentationThresholds,
    generation: u64,
  ) -> Self {
    Self {
      image,
      thresholds,
      generation,
      attempts: 0,
      state: AutomaticState::AwaitingRun,
    }
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn state(&self) -> &AutomaticState {
    &self.state
  }

  pub fn mask(&self) -> Option<&SegmentationMask> {
    match &self.state {
      AutomaticState::Done(mask) => Some(mask),
      _ => None,
    }
  }

  /// 进入 running 状态并取出任务；失败后允许重试
  pub fn begin(&mut self) -> Result<SegmentationJob, MeasureError> {
    match self.state {
      AutomaticState::AwaitingRun | AutomaticState::Failed(_) => {
        self.attempts = self.attempts.wrapping_add(1);
        let token = JobToken {
          generation: self.generation,
          attempt: self.attempts,
        };
        self.state = AutomaticState::Running(token);
        info!("开始自动分割 (代次 {}, 第 {} 次)...", token.generation, token.attempt);
        Ok(SegmentationJob {
          token,
          image: Arc::clone(&self.image),
          thresholds: self.thresholds.clone(),
        })
      }
      _ => Err(MeasureError::InvalidStage {
        stage: self.state.name(),
        action: "begin_automatic",
      }),
    }
  }

  /// 应用任务结果；任何错误都会转为 failed 状态，由调用方改用手动描边。
  ///
  /// 结果必须来自当前正在运行的任务，否则拒绝且不改变状态。
  pub fn complete(
    &mut self,
    outcome: SegmentationOutcome,
  ) -> Result<&SegmentationMask, MeasureError> {
    let current = match self.state {
      AutomaticState::Running(token) => token,
      _ => {
        return Err(MeasureError::InvalidStage {
          stage: self.state.name(),
          action: "complete_automatic",
        });
      }
    };
    if outcome.token != current || !Arc::ptr_eq(&outcome.image, &self.image) {
      warn!(
        "丢弃过期的分割结果: 任务 {:?}, 当前 {:?}",
        outcome.token, current
      );
      return Err(MeasureError::InvalidStage {
        stage: "running",
        action: "complete_automatic(stale_job)",
      });
    }

    match outcome.result {
      Ok(mask) => {
        info!("自动分割完成, 标记像素 {}", mask.flagged_count());
        self.state = AutomaticState::Done(mask);
        self.mask().ok_or(MeasureError::InvalidStage {
          stage: "done",
          action: "complete_automatic",
        })
      }
      Err(err) => {
        let reason = match err {
          MeasureError::SegmentationFailed(reason) => reason,
          other => other.to_string(),
        };
        warn!("自动分割失败, 可改用手动描边: {}", reason);
        self.state = AutomaticState::Failed(reason.clone());
        Err(MeasureError::SegmentationFailed(reason))
      }
    }
  }

  pub fn run(&mut self) -> Result<&SegmentationMask, MeasureError> {
    let outcome = self.begin()?.run();
    self.complete(outcome)
  }
}
