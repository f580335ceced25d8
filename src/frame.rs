// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - HWC BGR 帧定义
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

const BGR_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 高 x 宽 x 3 布局的 BGR 像素帧
#[derive(Debug, Clone)]
pub struct BgrFrame {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl BgrFrame {
  pub fn new(width: usize, height: usize, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = BGR_CHANNELS * width * height;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 全黑帧，用于模型预热
  pub fn blank(width: usize, height: usize) -> Self {
    let data = vec![0u8; BGR_CHANNELS * width * height].into_boxed_slice();
    Self {
      width,
      height,
      data,
    }
  }

  /// 从 RGB 交错数据构造，逐像素交换 R 与 B 通道
  pub fn from_rgb(width: usize, height: usize, rgb: &[u8]) -> Result<Self, FrameError> {
    let mut data = rgb.to_vec();
    for pixel in data.chunks_exact_mut(BGR_CHANNELS) {
      pixel.swap(0, 2);
    }
    Self::new(width, height, data)
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    BGR_CHANNELS
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }
}

impl AsRef<[u8]> for BgrFrame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

impl AsMut<[u8]> for BgrFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

#[cfg(feature = "read_image_file")]
impl From<&image::RgbImage> for BgrFrame {
  fn from(image: &image::RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let mut data = image.as_raw().clone();
    for pixel in data.chunks_exact_mut(BGR_CHANNELS) {
      pixel.swap(0, 2);
    }
    Self {
      width: width as usize,
      height: height as usize,
      data: data.into_boxed_slice(),
    }
  }
}
