// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/pipeline.rs - 测量流程状态机
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

//! 一次测量会话的显式有限状态机。
//!
//! `Idle → Acquiring → Calibrating → Segmenting → Measured`，
//! 每个阶段都可以由用户退回到更早的阶段，退回时丢弃之后阶段的状态。
//! 界面只负责渲染当前阶段并派发事件。

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
  calibration::{Calibration, PixelScale, PointOutcome, ReferenceSpec},
  config::PipelineConfig,
  error::MeasureError,
  frame::RasterImage,
  geometry::Point,
  input::{Acquired, Acquisition, CameraBackend, CameraRequest, CaptureSource},
  measurement::{WoundMeasurement, measure},
  output::{ClinicalRecordSink, MeasurementHandoff, Overlay},
  segmentation::{
    AutomaticSegmenter, ManualTracer, Segmentation, SegmentationJob, SegmentationOutcome, Strategy,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
  Idle,
  Acquiring,
  Calibrating,
  Segmenting,
  Measured,
}

#[derive(Debug)]
pub enum StrategyState {
  Unselected,
  Automatic(AutomaticSegmenter),
  Manual(ManualTracer),
}

#[derive(Debug)]
pub enum Stage {
  Idle,
  Acquiring,
  Calibrating {
    image: Arc<RasterImage>,
    calibration: Calibration,
  },
  Segmenting {
    image: Arc<RasterImage>,
    calibration: Calibration,
    scale: PixelScale,
    strategy: StrategyState,
  },
  Measured {
    image: Arc<RasterImage>,
    calibration: Calibration,
    scale: PixelScale,
    segmentation: Segmentation,
    measurement: WoundMeasurement,
  },
}

impl Stage {
  pub fn kind(&self) -> StageKind {
    match self {
      Stage::Idle => StageKind::Idle,
      Stage::Acquiring => StageKind::Acquiring,
      Stage::Calibrating { .. } => StageKind::Calibrating,
      Stage::Segmenting { .. } => StageKind::Segmenting,
      Stage::Measured { .. } => StageKind::Measured,
    }
  }

  pub fn name(&self) -> &'static str {
    match self.kind() {
      StageKind::Idle => "idle",
      StageKind::Acquiring => "acquiring",
      StageKind::Calibrating => "calibrating",
      StageKind::Segmenting => "segmenting",
      StageKind::Measured => "measured",
    }
  }

  pub fn image(&self) -> Option<&Arc<RasterImage>> {
    match self {
      Stage::Idle | Stage::Acquiring => None,
      Stage::Calibrating { image, .. }
      | Stage::Segmenting { image, .. }
      | Stage::Measured { image, .. } => Some(image),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionStatus {
  /// 视频流已打开，等待抓帧
  Streaming { width: u32, height: u32 },
  /// 已得到图像，进入标定阶段
  ImageReady { width: u32, height: u32 },
}

/// 单次会话，不与其他会话共享任何状态
pub struct WoundSession {
  config: PipelineConfig,
  acquisition: Acquisition,
  reference: ReferenceSpec,
  /// 每次新建自动分割器时递增，用于识别过期的分割任务
  generation: u64,
  stage: Stage,
}

impl WoundSession {
  pub fn new(config: PipelineConfig) -> Self {
    Self::with_acquisition(config, Acquisition::new())
  }

  pub fn with_camera(config: PipelineConfig, backend: Box<dyn CameraBackend>) -> Self {
    Self::with_acquisition(config, Acquisition::with_backend(backend))
  }

  fn with_acquisition(config: PipelineConfig, acquisition: Acquisition) -> Self {
    Self {
      config,
      acquisition,
      reference: ReferenceSpec::Naira1Coin,
      generation: 0,
      stage: Stage::Idle,
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn stage(&self) -> &Stage {
    &self.stage
  }

  pub fn kind(&self) -> StageKind {
    self.stage.kind()
  }

  pub fn is_streaming(&self) -> bool {
    self.acquisition.is_streaming()
  }

  pub fn measurement(&self) -> Option<&WoundMeasurement> {
    match &self.stage {
      Stage::Measured { measurement, .. } => Some(measurement),
      _ => None,
    }
  }

  fn invalid(&self, action: &'static str) -> MeasureError {
    MeasureError::InvalidStage {
      stage: self.stage.name(),
      action,
    }
  }

  fn transition(&mut self, from: &'static str, next: Stage) {
    info!("阶段切换: {} -> {}", from, next.name());
    // 离开采集阶段时无条件释放摄像头
    if !matches!(next, Stage::Acquiring) {
      self.acquisition.release_capture();
    }
    self.stage = next;
  }

  // ---- 采集 ----

  pub fn acquire(&mut self, source: CaptureSource) -> Result<AcquisitionStatus, MeasureError> {
    match self.stage {
      Stage::Idle => self.transition("idle", Stage::Acquiring),
      Stage::Acquiring => {}
      _ => return Err(self.invalid("acquire")),
    }

    match self.acquisition.start_capture(source)? {
      Acquired::StreamReady { width, height } => Ok(AcquisitionStatus::Streaming { width, height }),
      Acquired::Image(image) => {
        let (width, height) = image.dimensions();
        self.enter_calibrating(image);
        Ok(AcquisitionStatus::ImageReady { width, height })
      }
    }
  }

  pub fn start_camera(&mut self, device: &str) -> Result<AcquisitionStatus, MeasureError> {
    let request = CameraRequest::new(device, &self.config.camera);
    self.acquire(CaptureSource::Camera(request))
  }

  pub fn load_file(
    &mut self,
    bytes: Vec<u8>,
    mime: Option<&str>,
  ) -> Result<AcquisitionStatus, MeasureError> {
    self.acquire(CaptureSource::File {
      bytes,
      mime: mime.map(str::to_string),
    })
  }

  /// 从视频流抓取一帧并进入标定；失败时释放摄像头，仍可改为上传文件
  pub fn capture_frame(&mut self) -> Result<AcquisitionStatus, MeasureError> {
    if !matches!(self.stage, Stage::Acquiring) {
      return Err(self.invalid("capture_frame"));
    }
    match self.acquisition.capture_frame() {
      Ok(image) => {
        let (width, height) = image.dimensions();
        self.enter_calibrating(image);
        Ok(AcquisitionStatus::ImageReady { width, height })
      }
      Err(err) => {
        warn!("抓帧失败: {}", err);
        self.acquisition.release_capture();
        Err(err)
      }
    }
  }

  fn enter_calibrating(&mut self, image: RasterImage) {
    let calibration = Calibration::new(image.width(), image.height(), self.reference.clone());
    let next = Stage::Calibrating {
      image: Arc::new(image),
      calibration,
    };
    self.transition(self.stage.name(), next);
  }

  // ---- 标定 ----

  fn calibration_mut(&mut self, action: &'static str) -> Result<&mut Calibration, MeasureError> {
    let stage = self.stage.name();
    match &mut self.stage {
      Stage::Calibrating { calibration, .. } => Ok(calibration),
      _ => Err(MeasureError::InvalidStage { stage, action }),
    }
  }

  pub fn select_reference(&mut self, reference: ReferenceSpec) -> Result<(), MeasureError> {
    self
      .calibration_mut("select_reference")?
      .select_reference(reference.clone());
    self.reference = reference;
    Ok(())
  }

  pub fn record_calibration_point(&mut self, x: f64, y: f64) -> Result<PointOutcome, MeasureError> {
    self.calibration_mut("record_calibration_point")?.record_point(x, y)
  }

  /// 计算比例尺并进入分割阶段，失败时停留在标定阶段
  pub fn confirm_calibration(&mut self) -> Result<PixelScale, MeasureError> {
    let from = self.stage.name();
    match std::mem::replace(&mut self.stage, Stage::Idle) {
      Stage::Calibrating {
        image,
        mut calibration,
      } => match calibration.compute_scale() {
        Ok(scale) => {
          self.transition(from, Stage::Segmenting {
            image,
            calibration,
            scale,
            strategy: StrategyState::Unselected,
          });
          Ok(scale)
        }
        Err(err) => {
          self.stage = Stage::Calibrating { image, calibration };
          Err(err)
        }
      },
      other => {
        self.stage = other;
        Err(self.invalid("confirm_calibration"))
      }
    }
  }

  // ---- 分割 ----

  pub fn choose_strategy(&mut self, choice: Strategy) -> Result<(), MeasureError> {
    let stage = self.stage.name();
    let thresholds = &self.config.segmentation;
    let generation = &mut self.generation;
    match &mut self.stage {
      Stage::Segmenting {
        image, strategy, ..
      } => {
        info!("选择分割方式: {:?}", choice);
        *strategy = match choice {
          Strategy::Automatic => {
            *generation = generation.wrapping_add(1);
            StrategyState::Automatic(AutomaticSegmenter::with_generation(
              Arc::clone(image),
              thresholds.clone(),
              *generation,
            ))
          }
          Strategy::Manual => StrategyState::Manual(ManualTracer::new(image.width(), image.height())),
        };
        Ok(())
      }
      _ => Err(MeasureError::InvalidStage {
        stage,
        action: "choose_strategy",
      }),
    }
  }

  /// 尚未选择时默认选中 `default`
  fn strategy_mut(
    &mut self,
    default: Strategy,
    action: &'static str,
  ) -> Result<&mut StrategyState, MeasureError> {
    if let Stage::Segmenting {
      strategy: StrategyState::Unselected,
      ..
    } = self.stage
    {
      self.choose_strategy(default)?;
    }
    let stage = self.stage.name();
    match &mut self.stage {
      Stage::Segmenting { strategy, .. } => Ok(strategy),
      _ => Err(MeasureError::InvalidStage { stage, action }),
    }
  }

  fn automatic_mut(&mut self, action: &'static str) -> Result<&mut AutomaticSegmenter, MeasureError> {
    match self.strategy_mut(Strategy::Automatic, action)? {
      StrategyState::Automatic(segmenter) => Ok(segmenter),
      _ => Err(MeasureError::InvalidStage {
        stage: "segmenting(manual)",
        action,
      }),
    }
  }

  fn manual_mut(&mut self, action: &'static str) -> Result<&mut ManualTracer, MeasureError> {
    match self.strategy_mut(Strategy::Manual, action)? {
      StrategyState::Manual(tracer) => Ok(tracer),
      _ => Err(MeasureError::InvalidStage {
        stage: "segmenting(automatic)",
        action,
      }),
    }
  }

  pub fn run_automatic(&mut self) -> Result<&WoundMeasurement, MeasureError> {
    let outcome = self.begin_automatic()?.run();
    self.complete_automatic(outcome)
  }

  /// 取出可在其他线程运行的分割任务
  pub fn begin_automatic(&mut self) -> Result<SegmentationJob, MeasureError> {
    self.automatic_mut("begin_automatic")?.begin()
  }

  /// 应用分割结果并测量；掩码为空时停留在分割阶段。
  ///
  /// 结果所属的任务已被重新分割、重新标定或重新采集取代时返回
  /// [`MeasureError::InvalidStage`]，会话状态保持不变。
  pub fn complete_automatic(
    &mut self,
    outcome: SegmentationOutcome,
  ) -> Result<&WoundMeasurement, MeasureError> {
    let stage = self.stage.name();
    match &mut self.stage {
      Stage::Segmenting {
        strategy: StrategyState::Automatic(segmenter),
        ..
      } => {
        segmenter.complete(outcome)?;
      }
      _ => {
        warn!("当前没有运行中的自动分割, 丢弃任务 {:?} 的结果", outcome.token());
        return Err(MeasureError::InvalidStage {
          stage,
          action: "complete_automatic",
        });
      }
    }
    self.finish_segmentation("complete_automatic")
  }

  pub fn add_boundary_point(&mut self, x: f64, y: f64) -> Result<Point, MeasureError> {
    self.manual_mut("add_boundary_point")?.add_boundary_point(x, y)
  }

  pub fn clear_boundary_points(&mut self) -> Result<(), MeasureError> {
    self.manual_mut("clear_boundary_points")?.clear_boundary_points();
    Ok(())
  }

  pub fn finalize_polygon(&mut self) -> Result<&WoundMeasurement, MeasureError> {
    self.manual_mut("finalize_polygon")?;
    self.finish_segmentation("finalize_polygon")
  }

  fn finish_segmentation(&mut self, action: &'static str) -> Result<&WoundMeasurement, MeasureError> {
    let from = self.stage.name();
    match std::mem::replace(&mut self.stage, Stage::Idle) {
      Stage::Segmenting {
        image,
        calibration,
        scale,
        strategy,
      } => {
        let segmentation = match &strategy {
          StrategyState::Automatic(segmenter) => {
            segmenter
              .mask()
              .cloned()
              .map(Segmentation::Mask)
              .ok_or(MeasureError::InvalidStage {
                stage: segmenter.state().name(),
                action,
              })
          }
          StrategyState::Manual(tracer) => tracer.finalize_polygon().map(Segmentation::Polygon),
          StrategyState::Unselected => Err(MeasureError::InvalidStage {
            stage: "segmenting",
            action,
          }),
        };
        let outcome = segmentation.and_then(|segmentation| {
          measure(&image, &segmentation, scale, &self.config).map(|m| (m, segmentation))
        });

        match outcome {
          Ok((measurement, segmentation)) => {
            info!(
              "{:?} 分割完成, 创面 {:.0} 像素",
              segmentation.strategy(),
              segmentation.area_px()
            );
            self.transition(from, Stage::Measured {
              image,
              calibration,
              scale,
              segmentation,
              measurement,
            });
          }
          Err(err) => {
            self.stage = Stage::Segmenting {
              image,
              calibration,
              scale,
              strategy,
            };
            return Err(err);
          }
        }
      }
      other => {
        self.stage = other;
        return Err(self.invalid(action));
      }
    }

    let stage = self.stage.name();
    self
      .measurement()
      .ok_or(MeasureError::InvalidStage { stage, action })
  }

  // ---- 回退 ----

  /// 回到采集阶段，丢弃图像及之后的全部状态
  pub fn restart_acquisition(&mut self) {
    self.acquisition.release_capture();
    self.transition(self.stage.name(), Stage::Acquiring);
  }

  /// 清除标定点，回到标定阶段
  pub fn reset_calibration(&mut self) -> Result<(), MeasureError> {
    let from = self.stage.name();
    match std::mem::replace(&mut self.stage, Stage::Idle) {
      Stage::Calibrating {
        image,
        mut calibration,
      }
      | Stage::Segmenting {
        image,
        mut calibration,
        ..
      }
      | Stage::Measured {
        image,
        mut calibration,
        ..
      } => {
        calibration.reset();
        self.transition(from, Stage::Calibrating { image, calibration });
        Ok(())
      }
      other => {
        self.stage = other;
        Err(self.invalid("reset_calibration"))
      }
    }
  }

  /// 重新分割，保留标定结果
  pub fn remeasure(&mut self) -> Result<(), MeasureError> {
    let from = self.stage.name();
    match std::mem::replace(&mut self.stage, Stage::Idle) {
      Stage::Segmenting {
        image,
        calibration,
        scale,
        ..
      }
      | Stage::Measured {
        image,
        calibration,
        scale,
        ..
      } => {
        self.transition(from, Stage::Segmenting {
          image,
          calibration,
          scale,
          strategy: StrategyState::Unselected,
        });
        Ok(())
      }
      other => {
        self.stage = other;
        Err(self.invalid("remeasure"))
      }
    }
  }

  pub fn cancel(&mut self) {
    self.transition(self.stage.name(), Stage::Idle);
  }

  // ---- 交付 ----

  /// 生成测量结果与带标注的快照，只能在 measured 阶段调用
  pub fn handoff(&self) -> Result<MeasurementHandoff, MeasureError> {
    match &self.stage {
      Stage::Measured {
        image,
        calibration,
        segmentation,
        measurement,
        ..
      } => {
        let snapshot = Overlay::default().snapshot(image, calibration.points(), segmentation)?;
        Ok(MeasurementHandoff::new(
          measurement.clone(),
          calibration.reference().clone(),
          snapshot,
        ))
      }
      _ => Err(self.invalid("handoff")),
    }
  }

  pub fn hand_off<S>(&self, sink: &S) -> Result<MeasurementHandoff, S::Error>
  where
    S: ClinicalRecordSink,
    S::Error: From<MeasureError>,
  {
    let handoff = self.handoff()?;
    sink.record(&handoff)?;
    info!("测量结果已交付");
    Ok(handoff)
  }
}

impl Drop for WoundSession {
  fn drop(&mut self) {
    self.acquisition.release_capture();
  }
}
