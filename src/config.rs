// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 服务配置
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
use url::Url;

use crate::{FromUrl, decoded_path};

pub const DEFAULT_MODEL_PATH: &str = "yolo26n-seg.pt";
pub const DEFAULT_CONFIDENCE: f32 = 0.25;
pub const DEFAULT_WARMUP_SIZE: usize = 640;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("模型路径为空")]
  EmptyModelPath,
  #[error("模型路径不是有效的 UTF-8: {0}")]
  InvalidModelPath(String),
  #[error("置信度阈值必须位于 [0, 1]: {0}")]
  ConfidenceOutOfRange(f32),
  #[error("无法解析置信度阈值: {0}")]
  InvalidConfidence(String),
  #[error("预热帧尺寸无效: {0}x{1}")]
  InvalidWarmupSize(usize, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
  model_path: String,
  confidence: f32,
  warmup_width: usize,
  warmup_height: usize,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      model_path: DEFAULT_MODEL_PATH.to_string(),
      confidence: DEFAULT_CONFIDENCE,
      warmup_width: DEFAULT_WARMUP_SIZE,
      warmup_height: DEFAULT_WARMUP_SIZE,
    }
  }
}

impl ServiceConfig {
  pub fn new(model_path: impl Into<String>, confidence: f32) -> Result<Self, ConfigError> {
    let model_path = model_path.into();
    if model_path.is_empty() {
      return Err(ConfigError::EmptyModelPath);
    }

    Self {
      model_path,
      ..Self::default()
    }
    .with_confidence(confidence)
  }

  pub fn with_confidence(mut self, confidence: f32) -> Result<Self, ConfigError> {
    if !(0.0..=1.0).contains(&confidence) {
      return Err(ConfigError::ConfidenceOutOfRange(confidence));
    }
    self.confidence = confidence;
    Ok(self)
  }

  pub fn with_warmup_size(mut self, width: usize, height: usize) -> Result<Self, ConfigError> {
    if width == 0 || height == 0 {
      return Err(ConfigError::InvalidWarmupSize(width, height));
    }
    self.warmup_width = width;
    self.warmup_height = height;
    Ok(self)
  }

  pub fn model_path(&self) -> &str {
    &self.model_path
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  /// (宽, 高)
  pub fn warmup_size(&self) -> (usize, usize) {
    (self.warmup_width, self.warmup_height)
  }
}

/// 形如 `replay:///path/to/model?confidence=0.4` 的地址，方案由后端解析
impl FromUrl for ServiceConfig {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let confidence = match url.query_pairs().find(|(k, _)| k == "confidence") {
      Some((_, v)) => v
        .parse::<f32>()
        .map_err(|_| ConfigError::InvalidConfidence(v.to_string()))?,
      None => DEFAULT_CONFIDENCE,
    };

    let model_path =
      decoded_path(url).map_err(|_| ConfigError::InvalidModelPath(url.path().to_string()))?;
    Self::new(model_path, confidence)
  }
}
