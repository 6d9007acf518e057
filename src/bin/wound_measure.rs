// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/bin/wound_measure.rs - 命令行创面测量
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

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use chuangmian::{
  FromUrl, MeasureError,
  calibration::ReferenceSpec,
  config::PipelineConfig,
  input::CaptureSource,
  output::OutputWrapper,
  pipeline::{AcquisitionStatus, WoundSession},
  segmentation::Strategy,
};

/// 标定线段两端点 `x1,y1,x2,y2`
#[derive(Debug, Clone, Copy)]
struct CalibrationSegment([f64; 4]);

impl FromStr for CalibrationSegment {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let values = parse_numbers(s)?;
    let coords: [f64; 4] = values
      .try_into()
      .map_err(|v: Vec<f64>| format!("需要 4 个坐标，实际 {} 个", v.len()))?;
    Ok(Self(coords))
  }
}

/// 创面边界点 `x,y;x,y;...`
#[derive(Debug, Clone)]
struct BoundaryPoints(Vec<(f64, f64)>);

impl FromStr for BoundaryPoints {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.split(';')
      .filter(|p| !p.trim().is_empty())
      .map(|p| match parse_numbers(p)?.as_slice() {
        [x, y] => Ok((*x, *y)),
        other => Err(format!("边界点 '{}' 需要 2 个坐标，实际 {} 个", p, other.len())),
      })
      .collect::<Result<Vec<_>, _>>()
      .map(BoundaryPoints)
  }
}

fn parse_numbers(s: &str) -> Result<Vec<f64>, String> {
  s.split(',')
    .map(|v| {
      v.trim()
        .parse::<f64>()
        .map_err(|e| format!("无效的坐标 '{}': {}", v, e))
    })
    .collect()
}

/// Chuangmian 创面测量
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// 输入来源: image:///path/to/photo.jpg 或 v4l2:///dev/video0
  #[arg(long, value_name = "SOURCE")]
  input: Url,
  /// 输出: stdout:// 或 folder:///path/to/records
  #[arg(long, value_name = "OUTPUT", default_value = "stdout://")]
  output: Url,
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  config: Option<PathBuf>,
  /// 参照物: naira-1, naira-2, quarter, euro-1, ruler, id-card, custom:<cm>
  #[arg(long, value_name = "REFERENCE", default_value = "naira-1")]
  reference: ReferenceSpec,
  /// 参照物两端的像素坐标 x1,y1,x2,y2
  #[arg(long, value_name = "SEGMENT", allow_hyphen_values = true)]
  calibration: CalibrationSegment,
  /// 手动描绘的创面边界 x,y;x,y;...，缺省时使用自动分割
  #[arg(long, value_name = "POINTS")]
  polygon: Option<BoundaryPoints>,
}

fn session_for(config: PipelineConfig) -> WoundSession {
  #[cfg(feature = "v4l2_input")]
  {
    WoundSession::with_camera(config, Box::new(chuangmian::input::V4l2Backend))
  }
  #[cfg(not(feature = "v4l2_input"))]
  {
    WoundSession::new(config)
  }
}

fn report(err: MeasureError) -> anyhow::Error {
  error!("{}，建议处理方式: {:?}", err, err.remediation());
  err.into()
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("参照物: {}", args.reference);

  let config = match &args.config {
    Some(path) => PipelineConfig::from_json_file(path)?,
    None => PipelineConfig::default(),
  };
  let output = OutputWrapper::from_url(&args.output)?;
  let source = CaptureSource::from_url_with(&args.input, &config.camera)?;

  let mut session = session_for(config);

  if let AcquisitionStatus::Streaming { width, height } = session.acquire(source).map_err(report)? {
    info!("视频流已就绪: {}x{}", width, height);
    session.capture_frame().map_err(report)?;
  }

  session.select_reference(args.reference).map_err(report)?;
  let [x1, y1, x2, y2] = args.calibration.0;
  session.record_calibration_point(x1, y1).map_err(report)?;
  session.record_calibration_point(x2, y2).map_err(report)?;
  let scale = session.confirm_calibration().map_err(report)?;
  info!("比例尺: {:.3} px/cm", scale.pixels_per_cm());

  let measurement = match args.polygon {
    Some(BoundaryPoints(points)) => {
      session.choose_strategy(Strategy::Manual).map_err(report)?;
      for (x, y) in points {
        session.add_boundary_point(x, y).map_err(report)?;
      }
      session.finalize_polygon().map_err(report)?
    }
    None => session.run_automatic().map_err(|err| {
      if matches!(err, MeasureError::MeasurementUndefined(_)) {
        warn!("自动分割未找到创面，可使用 --polygon 手动描绘");
      }
      report(err)
    })?,
  };
  info!("测量完成: {}", measurement.rounded());

  session.hand_off(&output)?;

  Ok(())
}
