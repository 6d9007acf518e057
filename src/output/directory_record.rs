// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use chrono::{Datelike, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use thiserror::Error;
use tracing::info;

use crate::{FromUrl, FromUrlWithScheme};

use super::{ClinicalRecordSink, MeasurementHandoff};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按日期分目录保存测量记录：`YYYY/MM/DD/HH-MM-SS-XXXX.json`，
/// 同名 `.png` 为标注快照
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  record_counter: AtomicU16,
  snapshot: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  /// `folder:///var/lib/wounds`，加 `?snapshot=false` 时不保存快照
  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let snapshot = !uri
      .query_pairs()
      .any(|(k, v)| k == "snapshot" && (v == "false" || v == "0"));

    Ok(Self::new(uri.path(), snapshot))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl AsRef<Path>, snapshot: bool) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      record_counter: AtomicU16::new(0),
      snapshot,
    }
  }

  fn record_id(&self) -> u16 {
    self.record_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn record_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.json",
      now.format("%H-%M-%S"),
      self.record_id()
    )))
  }
}

impl ClinicalRecordSink for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn record(&self, handoff: &MeasurementHandoff) -> Result<(), Self::Error> {
    let path = self.record_path()?;
    if self.snapshot {
      std::fs::write(path.with_extension("png"), handoff.snapshot.png_bytes())?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&handoff.record())?)?;
    info!("测量记录已保存: {}", path.display());
    Ok(())
  }
}
