// 该文件是 Chuangmian （创面测量） 项目的一部分。
// src/input/v4l2_camera.rs - V4L2 摄像头输入
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

use std::pin::Pin;

use image::{ImageFormat, RgbImage};
use tracing::{debug, info};
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{error::MeasureError, frame::RasterImage};

use super::{CameraBackend, CameraRequest, CameraStream};

const STREAM_BUFFERS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelEncoding {
  Yuyv,
  Mjpeg,
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> MeasureError {
  MeasureError::DeviceUnavailable(format!("{}: {}", context, err))
}

/// 打开本机 V4L2 设备
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Backend;

impl CameraBackend for V4l2Backend {
  fn open(&self, request: &CameraRequest) -> Result<Box<dyn CameraStream>, MeasureError> {
    Ok(Box::new(V4l2Camera::open(request)?))
  }
}

/// V4L2 摄像头
///
/// v4l 库的 Stream 需要引用 Device，这里用 Pin<Box<Device>> 固定设备的
/// 内存地址，从而可以安全地创建引用它的 Stream。
pub struct V4l2Camera {
  device: Pin<Box<Device>>,
  stream: Option<Stream<'static>>,
  encoding: PixelEncoding,
  width: u32,
  height: u32,
}

impl V4l2Camera {
  pub fn open(request: &CameraRequest) -> Result<Self, MeasureError> {
    let device = Box::pin(
      Device::with_path(&request.device)
        .map_err(|e| unavailable(&format!("无法打开设备 {}", request.device), e))?,
    );

    // 先请求 YUYV，驱动会把分辨率调整到设备支持的最接近值
    let mut format = device
      .format()
      .map_err(|e| unavailable("无法读取视频格式", e))?;
    format.width = request.ideal_width;
    format.height = request.ideal_height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| unavailable("无法设置视频格式", e))?;

    let encoding = if format.fourcc == FourCC::new(b"YUYV") {
      PixelEncoding::Yuyv
    } else if format.fourcc == FourCC::new(b"MJPG") {
      PixelEncoding::Mjpeg
    } else {
      return Err(unavailable("不支持的像素格式", format.fourcc));
    };

    info!(
      "摄像头 {} 已打开: {}x{} {:?}",
      request.device, format.width, format.height, encoding
    );

    let mut camera = Self {
      device,
      stream: None,
      encoding,
      width: format.width,
      height: format.height,
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上，不会移动；
    // stream 在 Drop 中先于 device 释放
    let device_ref: &Device = &camera.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, STREAM_BUFFERS)
        .map_err(|e| unavailable("无法创建捕获流", e))?
    };
    camera.stream = Some(stream);
    Ok(camera)
  }

  /// YUYV 转 RGB，每 4 字节对应两个像素
  fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pixels = (width * height) as usize;
    let mut rgb = Vec::with_capacity(pixels * 3);

    for chunk in yuyv.chunks_exact(4).take(pixels / 2) {
      let u = chunk[1] as f32 - 128.0;
      let v = chunk[3] as f32 - 128.0;
      for y in [chunk[0] as f32, chunk[2] as f32] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }

    rgb
  }
}

impl Drop for V4l2Camera {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
    debug!("摄像头视频流已停止");
  }
}

impl CameraStream for V4l2Camera {
  fn native_size(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  fn grab(&mut self) -> Result<RasterImage, MeasureError> {
    let stream = self
      .stream
      .as_mut()
      .ok_or_else(|| MeasureError::DeviceUnavailable("视频流已关闭".to_string()))?;
    let (buffer, meta) = stream.next().map_err(|e| unavailable("无法捕获帧", e))?;
    let used = (meta.bytesused as usize).min(buffer.len());
    let data = if used > 0 { &buffer[..used] } else { buffer };

    match self.encoding {
      PixelEncoding::Yuyv => {
        let rgb = Self::yuyv_to_rgb(data, self.width, self.height);
        let image = RgbImage::from_raw(self.width, self.height, rgb)
          .ok_or_else(|| unavailable("无法创建 RGB 图像", "帧数据不完整"))?;
        RasterImage::from_rgb(image)
      }
      PixelEncoding::Mjpeg => {
        let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
        RasterImage::try_from(image)
      }
    }
  }
}
