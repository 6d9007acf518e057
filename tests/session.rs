// 该文件是 Chuangmian （创面测量） 项目的一部分。
// tests/session.rs - 测量会话集成测试
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

use std::cell::Cell;
use std::io::Cursor;
use std::rc::Rc;

use image::{ImageFormat, Rgba, RgbaImage};

use chuangmian::{
  MeasureError, Remediation,
  calibration::{PointOutcome, ReferenceSpec},
  config::PipelineConfig,
  frame::RasterImage,
  input::{CameraBackend, CameraRequest, CameraStream},
  output::{ClinicalRecordSink, MeasurementHandoff},
  pipeline::{AcquisitionStatus, Stage, StageKind, WoundSession},
  segmentation::Strategy,
};

const SKIN: Rgba<u8> = Rgba([235, 205, 185, 255]);
const WOUND: Rgba<u8> = Rgba([190, 50, 50, 255]);

struct StubCamera {
  frame: RgbaImage,
  live: Rc<Cell<usize>>,
}

impl Drop for StubCamera {
  fn drop(&mut self) {
    self.live.set(self.live.get() - 1);
  }
}

impl CameraStream for StubCamera {
  fn native_size(&self) -> (u32, u32) {
    self.frame.dimensions()
  }

  fn grab(&mut self) -> Result<RasterImage, MeasureError> {
    RasterImage::from_rgba(self.frame.clone())
  }
}

struct StubBackend {
  frame: RgbaImage,
  live: Rc<Cell<usize>>,
}

impl CameraBackend for StubBackend {
  fn open(&self, _request: &CameraRequest) -> Result<Box<dyn CameraStream>, MeasureError> {
    self.live.set(self.live.get() + 1);
    Ok(Box::new(StubCamera {
      frame: self.frame.clone(),
      live: Rc::clone(&self.live),
    }))
  }
}

struct DeniedBackend;

impl CameraBackend for DeniedBackend {
  fn open(&self, request: &CameraRequest) -> Result<Box<dyn CameraStream>, MeasureError> {
    Err(MeasureError::DeviceUnavailable(format!(
      "{}: permission denied",
      request.device
    )))
  }
}

#[derive(Default)]
struct CollectingSink {
  received: std::cell::RefCell<Vec<MeasurementHandoff>>,
}

impl ClinicalRecordSink for CollectingSink {
  type Error = MeasureError;

  fn record(&self, handoff: &MeasurementHandoff) -> Result<(), Self::Error> {
    self.received.borrow_mut().push(handoff.clone());
    Ok(())
  }
}

/// 200x100 的皮肤底色，(50..90, 20..60) 为创面
fn wound_photo() -> RgbaImage {
  RgbaImage::from_fn(200, 100, |x, y| {
    if (50..90).contains(&x) && (20..60).contains(&y) {
      WOUND
    } else {
      SKIN
    }
  })
}

fn png(image: &RgbaImage) -> Vec<u8> {
  let mut out = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
    .unwrap();
  out
}

fn calibrate_coin(session: &mut WoundSession) {
  session.select_reference(ReferenceSpec::Naira1Coin).unwrap();
  session.record_calibration_point(10.0, 90.0).unwrap();
  session.record_calibration_point(54.0, 90.0).unwrap();
}

#[test]
fn coin_calibration_gives_twenty_pixels_per_cm() {
  let mut session = WoundSession::new(PipelineConfig::default());
  session.load_file(png(&wound_photo()), Some("image/png")).unwrap();
  calibrate_coin(&mut session);
  let scale = session.confirm_calibration().unwrap();
  assert!((scale.pixels_per_cm() - 20.0).abs() < 1e-9);
  assert_eq!(session.kind(), StageKind::Segmenting);
}

#[test]
fn manual_rectangle_is_measured_and_handed_off() {
  let mut session = WoundSession::new(PipelineConfig::default());
  session.load_file(png(&wound_photo()), None).unwrap();
  calibrate_coin(&mut session);
  session.confirm_calibration().unwrap();

  session.choose_strategy(Strategy::Manual).unwrap();
  for (x, y) in [(0.0, 0.0), (100.0, 0.0), (100.0, 60.0), (0.0, 60.0)] {
    session.add_boundary_point(x, y).unwrap();
  }
  let m = session.finalize_polygon().unwrap().clone();
  assert!((m.length_cm - 3.0).abs() < 1e-9);
  assert!((m.width_cm - 5.0).abs() < 1e-9);
  assert!((m.area_cm2 - 15.0).abs() < 1e-9);
  assert!((m.perimeter_cm - 16.0).abs() < 1e-9);
  assert_eq!(m.method, Strategy::Manual);
  assert_eq!(m.granulation_percent, None);

  let sink = CollectingSink::default();
  let handoff = session.hand_off(&sink).unwrap();
  assert_eq!(sink.received.borrow().len(), 1);
  assert_eq!(handoff.measurement, m);
  assert_eq!(handoff.snapshot.width(), 200);
}

#[test]
fn automatic_segmentation_measures_wound_patch() {
  let mut session = WoundSession::new(PipelineConfig::default());
  session.load_file(png(&wound_photo()), None).unwrap();
  calibrate_coin(&mut session);
  session.confirm_calibration().unwrap();

  let m = session.run_automatic().unwrap();
  // 40x40 像素，20 px/cm
  assert!((m.area_cm2 - 4.0).abs() < 1e-9);
  assert!((m.length_cm - 2.0).abs() < 1e-9);
  assert!((m.width_cm - 2.0).abs() < 1e-9);
  assert_eq!(m.sample_count, 1600);
  assert_eq!(m.method, Strategy::Automatic);
  assert!((m.confidence - 0.85).abs() < 1e-9);
}

#[test]
fn background_only_image_falls_back_to_manual() {
  let mut session = WoundSession::new(PipelineConfig::default());
  let skin = RgbaImage::from_pixel(120, 80, SKIN);
  session.load_file(png(&skin), None).unwrap();
  calibrate_coin(&mut session);
  session.confirm_calibration().unwrap();

  let err = session.run_automatic().unwrap_err();
  assert!(matches!(err, MeasureError::MeasurementUndefined(_)));
  assert_eq!(err.remediation(), Remediation::SwitchToManual);
  assert_eq!(session.kind(), StageKind::Segmenting);

  session.choose_strategy(Strategy::Manual).unwrap();
  for (x, y) in [(10.0, 10.0), (50.0, 10.0), (50.0, 30.0)] {
    session.add_boundary_point(x, y).unwrap();
  }
  assert!(session.finalize_polygon().is_ok());
}

#[test]
fn zero_length_custom_reference_is_rejected() {
  let mut session = WoundSession::new(PipelineConfig::default());
  session.load_file(png(&wound_photo()), None).unwrap();
  session.select_reference(ReferenceSpec::Custom(Some(0.0))).unwrap();
  session.record_calibration_point(0.0, 0.0).unwrap();
  session.record_calibration_point(40.0, 0.0).unwrap();
  assert!(matches!(
    session.confirm_calibration(),
    Err(MeasureError::InvalidInput(_))
  ));
  assert_eq!(session.kind(), StageKind::Calibrating);
}

#[test]
fn third_click_ignored_and_clicks_clamped() {
  let mut session = WoundSession::new(PipelineConfig::default());
  session.load_file(png(&wound_photo()), None).unwrap();
  session.record_calibration_point(-5.0, 500.0).unwrap();
  session.record_calibration_point(20.0, 20.0).unwrap();
  assert_eq!(
    session.record_calibration_point(30.0, 30.0).unwrap(),
    PointOutcome::Ignored
  );
  match session.stage() {
    Stage::Calibrating { calibration, .. } => {
      let p = calibration.points()[0];
      assert_eq!((p.x, p.y), (0.0, 99.0));
      assert_eq!(calibration.points().len(), 2);
    }
    other => panic!("unexpected stage {:?}", other.kind()),
  }
}

#[test]
fn camera_capture_releases_device() {
  let live = Rc::new(Cell::new(0));
  let backend = StubBackend {
    frame: wound_photo(),
    live: Rc::clone(&live),
  };
  let mut session = WoundSession::with_camera(PipelineConfig::default(), Box::new(backend));

  let status = session.start_camera("/dev/video0").unwrap();
  assert_eq!(
    status,
    AcquisitionStatus::Streaming {
      width: 200,
      height: 100
    }
  );
  assert_eq!(live.get(), 1);
  assert!(session.is_streaming());

  session.capture_frame().unwrap();
  assert_eq!(live.get(), 0);
  assert_eq!(session.kind(), StageKind::Calibrating);

  // 重新采集后再次打开，取消时释放
  session.restart_acquisition();
  session.start_camera("/dev/video0").unwrap();
  assert_eq!(live.get(), 1);
  session.cancel();
  assert_eq!(live.get(), 0);
}

#[test]
fn file_upload_replaces_open_camera() {
  let live = Rc::new(Cell::new(0));
  let backend = StubBackend {
    frame: wound_photo(),
    live: Rc::clone(&live),
  };
  let mut session = WoundSession::with_camera(PipelineConfig::default(), Box::new(backend));
  session.start_camera("/dev/video0").unwrap();
  session.load_file(png(&wound_photo()), None).unwrap();
  assert_eq!(live.get(), 0);
  assert_eq!(session.kind(), StageKind::Calibrating);
}

#[test]
fn denied_camera_keeps_file_upload_open() {
  let mut session = WoundSession::with_camera(PipelineConfig::default(), Box::new(DeniedBackend));
  let err = session.start_camera("/dev/video0").unwrap_err();
  assert_eq!(err.remediation(), Remediation::UseFileUpload);
  assert_eq!(session.kind(), StageKind::Acquiring);
  assert!(session.load_file(png(&wound_photo()), None).is_ok());
}

#[test]
fn corrupt_upload_stays_in_acquiring() {
  let mut session = WoundSession::new(PipelineConfig::default());
  let err = session.load_file(b"not an image".to_vec(), None).unwrap_err();
  assert_eq!(err.remediation(), Remediation::ChooseAnotherImage);
  assert_eq!(session.kind(), StageKind::Acquiring);
}

#[test]
fn back_transitions_discard_later_state() {
  let mut session = WoundSession::new(PipelineConfig::default());
  session.load_file(png(&wound_photo()), None).unwrap();
  calibrate_coin(&mut session);
  session.confirm_calibration().unwrap();
  session.run_automatic().unwrap();
  assert_eq!(session.kind(), StageKind::Measured);

  // 重新测量保留比例尺
  session.remeasure().unwrap();
  assert!(session.measurement().is_none());
  match session.stage() {
    Stage::Segmenting { scale, .. } => assert!((scale.pixels_per_cm() - 20.0).abs() < 1e-9),
    other => panic!("unexpected stage {:?}", other.kind()),
  }
  session.run_automatic().unwrap();

  session.reset_calibration().unwrap();
  assert_eq!(session.kind(), StageKind::Calibrating);
  assert!(matches!(
    session.confirm_calibration(),
    Err(MeasureError::InsufficientInput {
      required: 2,
      actual: 0
    })
  ));

  session.restart_acquisition();
  assert_eq!(session.kind(), StageKind::Acquiring);
  assert!(session.stage().image().is_none());
}

#[test]
fn wrong_stage_actions_are_recoverable() {
  let mut session = WoundSession::new(PipelineConfig::default());
  let sink = CollectingSink::default();
  assert!(matches!(
    session.hand_off(&sink),
    Err(MeasureError::InvalidStage { stage: "idle", .. })
  ));
  assert!(matches!(
    session.record_calibration_point(1.0, 1.0),
    Err(MeasureError::InvalidStage { .. })
  ));
  assert!(matches!(
    session.capture_frame(),
    Err(MeasureError::InvalidStage { .. })
  ));

  session.load_file(png(&wound_photo()), None).unwrap();
  assert!(matches!(
    session.finalize_polygon(),
    Err(MeasureError::InvalidStage { .. })
  ));
  assert!(matches!(
    session.load_file(png(&wound_photo()), None),
    Err(MeasureError::InvalidStage { .. })
  ));
  assert_eq!(session.kind(), StageKind::Calibrating);
  assert!(sink.received.borrow().is_empty());
}

/// 100x100 的皮肤底色，左上角 (20, 20) 起一块 `side` 见方的创面
fn square_wound(side: u32) -> RgbaImage {
  RgbaImage::from_fn(100, 100, |x, y| {
    if (20..20 + side).contains(&x) && (20..20 + side).contains(&y) {
      WOUND
    } else {
      SKIN
    }
  })
}

/// 1 cm 刻度跨 10 像素
fn calibrate_ruler(session: &mut WoundSession) {
  session.select_reference(ReferenceSpec::RulerCentimeter).unwrap();
  session.record_calibration_point(0.0, 95.0).unwrap();
  session.record_calibration_point(10.0, 95.0).unwrap();
  session.confirm_calibration().unwrap();
}

#[test]
fn segmentation_job_from_previous_image_is_rejected() {
  let mut session = WoundSession::new(PipelineConfig::default());
  session.load_file(png(&square_wound(50)), None).unwrap();
  calibrate_ruler(&mut session);
  let previous = session.begin_automatic().unwrap();

  session.restart_acquisition();
  session.load_file(png(&square_wound(10)), None).unwrap();
  calibrate_ruler(&mut session);
  let current = session.begin_automatic().unwrap();

  // 旧图像的任务在其他线程完成后才送回
  let late = std::thread::spawn(move || previous.run()).join().unwrap();
  assert!(matches!(
    session.complete_automatic(late),
    Err(MeasureError::InvalidStage { .. })
  ));
  assert_eq!(session.kind(), StageKind::Segmenting);
  assert!(session.measurement().is_none());

  let m = session.complete_automatic(current.run()).unwrap();
  assert!((m.area_cm2 - 1.0).abs() < 1e-9);
  assert_eq!(m.sample_count, 100);
}

#[test]
fn segmentation_job_from_other_session_is_rejected() {
  let mut first = WoundSession::new(PipelineConfig::default());
  let mut second = WoundSession::new(PipelineConfig::default());
  for session in [&mut first, &mut second] {
    session.load_file(png(&square_wound(10)), None).unwrap();
    calibrate_ruler(session);
  }
  let foreign = first.begin_automatic().unwrap();
  let own = second.begin_automatic().unwrap();
  assert_eq!(foreign.token(), own.token());

  assert!(second.complete_automatic(foreign.run()).is_err());
  assert!(second.complete_automatic(own.run()).is_ok());
}

#[test]
fn non_finite_boundary_point_never_reaches_measurement() {
  let mut session = WoundSession::new(PipelineConfig::default());
  session.load_file(png(&wound_photo()), None).unwrap();
  calibrate_coin(&mut session);
  session.confirm_calibration().unwrap();
  session.choose_strategy(Strategy::Manual).unwrap();

  session.add_boundary_point(0.0, 0.0).unwrap();
  session.add_boundary_point(10.0, 0.0).unwrap();
  let err = session.add_boundary_point(f64::NAN, 10.0).unwrap_err();
  assert!(matches!(err, MeasureError::InvalidInput(_)));
  session.add_boundary_point(0.0, 10.0).unwrap();

  let m = session.finalize_polygon().unwrap();
  assert!(m.area_cm2.is_finite());
  assert!((m.area_cm2 - 50.0 / 400.0).abs() < 1e-12);
}
