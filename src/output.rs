// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/output.rs - 测量结果交付
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

use std::io::{Cursor, Write};
use std::sync::{Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, RgbaImage};
use serde::{Serialize, Serializer};
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  calibration::ReferenceSpec,
  error::MeasureError,
  measurement::{MeasurementSummary, WoundMeasurement},
};

mod overlay;
pub use self::overlay::Overlay;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

/// 测量结果的接收方，例如病历系统
pub trait ClinicalRecordSink {
  type Error;
  fn record(&self, handoff: &MeasurementHandoff) -> Result<(), Self::Error>;
}

/// 带标注的 PNG 快照
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSnapshot {
  png: Vec<u8>,
  width: u32,
  height: u32,
}

impl ImageSnapshot {
  pub const MIME: &'static str = "image/png";

  pub fn encode(image: &RgbaImage) -> Result<Self, MeasureError> {
    let mut png = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
      .map_err(|e| MeasureError::invalid_input(format!("快照编码失败: {}", e)))?;
    Ok(Self {
      png,
      width: image.width(),
      height: image.height(),
    })
  }

  pub fn png_bytes(&self) -> &[u8] {
    &self.png
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn to_base64(&self) -> String {
    STANDARD.encode(&self.png)
  }

  pub fn to_data_url(&self) -> String {
    format!("data:{};base64,{}", Self::MIME, self.to_base64())
  }
}

impl Serialize for ImageSnapshot {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_data_url())
  }
}

/// 不含图像的测量记录
#[derive(Debug, Clone, Serialize)]
pub struct MeasurementRecord<'a> {
  pub measurement: &'a WoundMeasurement,
  pub summary: MeasurementSummary,
  pub reference: &'a ReferenceSpec,
  pub reference_label: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeasurementHandoff {
  pub measurement: WoundMeasurement,
  pub summary: MeasurementSummary,
  pub reference: ReferenceSpec,
  pub reference_label: String,
  pub snapshot: ImageSnapshot,
}

impl MeasurementHandoff {
  pub fn new(
    measurement: WoundMeasurement,
    reference: ReferenceSpec,
    snapshot: ImageSnapshot,
  ) -> Self {
    Self {
      summary: measurement.rounded(),
      reference_label: reference.to_string(),
      measurement,
      reference,
      snapshot,
    }
  }

  pub fn record(&self) -> MeasurementRecord<'_> {
    MeasurementRecord {
      measurement: &self.measurement,
      summary: self.summary,
      reference: &self.reference,
      reference_label: &self.reference_label,
    }
  }
}

/// 每条结果写一行 JSON，快照以 data URL 内嵌
pub struct JsonLinesOutput<W: Write> {
  writer: Mutex<W>,
}

impl<W: Write> JsonLinesOutput<W> {
  pub fn new(writer: W) -> Self {
    Self {
      writer: Mutex::new(writer),
    }
  }

  pub fn into_inner(self) -> W {
    self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<W: Write> ClinicalRecordSink for JsonLinesOutput<W> {
  type Error = OutputError;

  fn record(&self, handoff: &MeasurementHandoff) -> Result<(), Self::Error> {
    let line = serde_json::to_string(handoff)?;
    let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(writer, "{}", line)?;
    writer.flush()?;
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("测量错误: {0}")]
  MeasureError(#[from] MeasureError),
  #[error("序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  Stdout(JsonLinesOutput<std::io::Stdout>),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl OutputWrapper {
  const STDOUT_SCHEME: &'static str = "stdout";
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  /// `stdout://` 或 `folder:///var/lib/wounds`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "directory_record")]
    use crate::FromUrlWithScheme;

    match url.scheme() {
      Self::STDOUT_SCHEME => Ok(OutputWrapper::Stdout(JsonLinesOutput::new(
        std::io::stdout(),
      ))),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => Ok(OutputWrapper::DirectoryRecordOutput(
        DirectoryRecordOutput::from_url(url)?,
      )),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl ClinicalRecordSink for OutputWrapper {
  type Error = OutputError;

  fn record(&self, handoff: &MeasurementHandoff) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Stdout(output) => output.record(handoff),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => Ok(output.record(handoff)?),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::segmentation::Strategy;
  use chrono::Utc;
  use image::Rgba;

  pub(crate) fn sample_handoff() -> MeasurementHandoff {
    let measurement = WoundMeasurement {
      length_cm: 3.04,
      width_cm: 5.0,
      area_cm2: 15.0,
      perimeter_cm: 16.0,
      granulation_percent: None,
      confidence: 0.95,
      method: Strategy::Manual,
      pixels_per_cm: 20.0,
      sample_count: 4,
      measured_at: Utc::now(),
    };
    let image = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]));
    let snapshot = ImageSnapshot::encode(&image).unwrap();
    MeasurementHandoff::new(measurement, ReferenceSpec::UsQuarter, snapshot)
  }

  #[test]
  fn snapshot_is_png_data_url() {
    let handoff = sample_handoff();
    let url = handoff.snapshot.to_data_url();
    assert!(url.starts_with("data:image/png;base64,"));
    let png = STANDARD
      .decode(url.trim_start_matches("data:image/png;base64,"))
      .unwrap();
    let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (4, 3));
  }

  #[test]
  fn handoff_carries_rounded_summary() {
    let handoff = sample_handoff();
    assert_eq!(handoff.summary.length_cm, 3.0);
    assert_eq!(handoff.reference_label, "US Quarter");
  }

  #[test]
  fn json_lines_output_writes_one_line_per_handoff() {
    let output = JsonLinesOutput::new(Vec::new());
    let handoff = sample_handoff();
    output.record(&handoff).unwrap();
    output.record(&handoff).unwrap();
    let text = String::from_utf8(output.into_inner()).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(value["measurement"]["method"], "manual");
    assert!(value["snapshot"]
      .as_str()
      .unwrap()
      .starts_with("data:image/png;base64,"));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("ftp://example.com/out").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch(_))
    ));
  }
}
