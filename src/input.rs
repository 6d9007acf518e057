// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/input.rs - 图像采集
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
use tracing::{info, warn};

use crate::{FromUrl, config::CameraConfig, error::MeasureError, frame::RasterImage};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, decode_image_bytes};

#[cfg(feature = "v4l2_input")]
mod v4l2_camera;
#[cfg(feature = "v4l2_input")]
pub use self::v4l2_camera::{V4l2Backend, V4l2Camera};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("参数错误: {0}")]
  InvalidParameter(String),
}

/// 摄像头请求：设备与期望分辨率，设备可协商出更低的分辨率
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRequest {
  pub device: String,
  pub ideal_width: u32,
  pub ideal_height: u32,
}

impl CameraRequest {
  pub fn new(device: impl Into<String>, config: &CameraConfig) -> Self {
    Self {
      device: device.into(),
      ideal_width: config.ideal_width,
      ideal_height: config.ideal_height,
    }
  }
}

/// 已打开的视频流，释放即停止
pub trait CameraStream {
  fn native_size(&self) -> (u32, u32);
  fn grab(&mut self) -> Result<RasterImage, MeasureError>;
}

pub trait CameraBackend {
  fn open(&self, request: &CameraRequest) -> Result<Box<dyn CameraStream>, MeasureError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureSource {
  Camera(CameraRequest),
  /// 上传的文件内容，`mime` 为浏览器或调用方声明的类型
  File { bytes: Vec<u8>, mime: Option<String> },
}

impl CaptureSource {
  const CAMERA_SCHEME: &'static str = "v4l2";

  /// 摄像头分辨率取自 `camera`，URL 中的 `width`/`height` 参数优先
  pub fn from_url_with(url: &url::Url, camera: &CameraConfig) -> Result<Self, InputError> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      ImageFileInput::SCHEME => {
        let input = ImageFileInput::from_url(url)?;
        Ok(input.into_source()?)
      }
      Self::CAMERA_SCHEME => {
        let device = if url.path().is_empty() || url.path() == "/" {
          "/dev/video0".to_string()
        } else {
          url.path().to_string()
        };
        let mut request = CameraRequest::new(device, camera);
        for (k, v) in url.query_pairs() {
          let parse = |v: &str| {
            v.parse::<u32>()
              .map_err(|e| InputError::InvalidParameter(format!("{}={}: {}", k, v, e)))
          };
          match k.as_ref() {
            "width" => request.ideal_width = parse(&v)?,
            "height" => request.ideal_height = parse(&v)?,
            _ => warn!("忽略未知参数: {}", k),
          }
        }
        Ok(CaptureSource::Camera(request))
      }
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl FromUrl for CaptureSource {
  type Error = InputError;

  /// `image:///path/to/photo.jpg` 或 `v4l2:///dev/video0?width=1280&height=720`
  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    Self::from_url_with(url, &CameraConfig::default())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Acquired {
  /// 视频流已就绪，等待 `capture_frame`
  StreamReady { width: u32, height: u32 },
  Image(RasterImage),
}

/// 采集控制器，持有唯一的摄像头句柄
#[derive(Default)]
pub struct Acquisition {
  backend: Option<Box<dyn CameraBackend>>,
  stream: Option<Box<dyn CameraStream>>,
}

impl Acquisition {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_backend(backend: Box<dyn CameraBackend>) -> Self {
    Self {
      backend: Some(backend),
      stream: None,
    }
  }

  pub fn is_streaming(&self) -> bool {
    self.stream.is_some()
  }

  pub fn start_capture(&mut self, source: CaptureSource) -> Result<Acquired, MeasureError> {
    // 新的采集开始前必须先释放旧设备
    self.release_capture();

    match source {
      CaptureSource::File { bytes, mime } => {
        let image = decode_image_bytes(&bytes, mime.as_deref())?;
        info!("已读取上传图像: {}x{}", image.width(), image.height());
        Ok(Acquired::Image(image))
      }
      CaptureSource::Camera(request) => {
        let backend = self
          .backend
          .as_ref()
          .ok_or_else(|| MeasureError::DeviceUnavailable("未配置摄像头".to_string()))?;
        let stream = backend.open(&request).inspect_err(|e| {
          warn!("摄像头 {} 打开失败, 可改为上传文件: {}", request.device, e);
        })?;
        let (width, height) = stream.native_size();
        if width < request.ideal_width || height < request.ideal_height {
          info!(
            "摄像头分辨率 {}x{} 低于期望的 {}x{}",
            width, height, request.ideal_width, request.ideal_height
          );
        }
        self.stream = Some(stream);
        Ok(Acquired::StreamReady { width, height })
      }
    }
  }

  /// 抓取当前帧，不停止视频流
  pub fn capture_frame(&mut self) -> Result<RasterImage, MeasureError> {
    let stream = self
      .stream
      .as_mut()
      .ok_or_else(|| MeasureError::DeviceUnavailable("没有活动的视频流".to_string()))?;
    stream.grab()
  }

  pub fn release_capture(&mut self) {
    if self.stream.take().is_some() {
      info!("已释放摄像头");
    }
  }
}
