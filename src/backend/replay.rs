// 该文件是 Shanan （山南西风） 项目的一部分。
// src/backend/replay.rs - 回放录制结果的推理后端
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

//! 按顺序回放录制文件中的逐帧结果，用于在没有加速硬件的机器上调试流水线。
//!
//! 录制文件为 JSON Lines，每行一帧：
//!
//! ```text
//! {"names": ["person", "bicycle", "car"], "latency_ms": 120}
//! {"boxes": [{"xyxy": [10.0, 20.0, 30.0, 40.0], "confidence": 0.91, "class_id": 0}]}
//! {"boxes": [], "masks": []}
//! ```
//!
//! 第一行可以是可选的头部，给出类别表和模拟推理耗时；缺省使用 COCO 类别表。

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  backend::{Backend, BackendCapability, ClassNames, InferenceModel, RawFrameResult},
  frame::BgrFrame,
};

#[derive(Error, Debug)]
pub enum ReplayError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行解析失败: {source}")]
  ParseError {
    line: usize,
    #[source]
    source: serde_json::Error,
  },
  #[error("第 {0} 行: 头部必须位于第一帧之前")]
  MisplacedHeader(usize),
  #[error("录制文件中没有任何帧")]
  EmptyRecording,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplayHeader {
  names: Option<Vec<String>>,
  latency_ms: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayLine {
  Frame(RawFrameResult),
  Header(ReplayHeader),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayBackend;

impl FromUrlWithScheme for ReplayBackend {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayBackend {
  type Error = ReplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ReplayError::SchemeMismatch);
    }
    Ok(ReplayBackend)
  }
}

impl ReplayBackend {
  /// 根据模型地址判断回放后端是否可用
  pub fn resolve(url: &Url) -> BackendCapability<Self> {
    match Self::from_url(url) {
      Ok(backend) => BackendCapability::available(backend),
      Err(_) => BackendCapability::unavailable(format!(
        "没有可处理 '{}' 方案的检测后端",
        url.scheme()
      )),
    }
  }
}

impl Backend for ReplayBackend {
  type Model = ReplayModel;
  type Error = ReplayError;

  fn load(&self, model_path: &str) -> Result<Self::Model, Self::Error> {
    info!("打开录制文件: {}", model_path);
    let file = File::open(model_path)?;
    ReplayModel::from_reader(BufReader::new(file))
  }
}

#[derive(Debug)]
pub struct ReplayModel {
  names: ClassNames,
  frames: Box<[RawFrameResult]>,
  latency: Duration,
  cursor: AtomicUsize,
}

impl ReplayModel {
  pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ReplayError> {
    let mut names = None;
    let mut latency = Duration::ZERO;
    let mut frames = Vec::new();

    for (index, line) in reader.lines().enumerate() {
      let line = line?;
      let line_no = index + 1;
      if line.trim().is_empty() {
        continue;
      }

      let parsed: ReplayLine = serde_json::from_str(&line).map_err(|source| ReplayError::ParseError {
        line: line_no,
        source,
      })?;
      match parsed {
        ReplayLine::Frame(frame) => frames.push(frame),
        ReplayLine::Header(header) => {
          if !frames.is_empty() || names.is_some() {
            return Err(ReplayError::MisplacedHeader(line_no));
          }
          names = Some(
            header
              .names
              .map(ClassNames::from_iter)
              .unwrap_or_else(ClassNames::coco),
          );
          latency = Duration::from_millis(header.latency_ms.unwrap_or(0));
        }
      }
    }

    if frames.is_empty() {
      return Err(ReplayError::EmptyRecording);
    }

    debug!("录制帧数: {}, 模拟耗时: {:?}", frames.len(), latency);
    Ok(Self {
      names: names.unwrap_or_else(ClassNames::coco),
      frames: frames.into_boxed_slice(),
      latency,
      cursor: AtomicUsize::new(0),
    })
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

impl InferenceModel for ReplayModel {
  type Error = ReplayError;

  /// 忽略帧内容，循环取出下一条录制结果并按阈值过滤
  fn infer(&self, _frame: &BgrFrame, confidence: f32) -> Result<RawFrameResult, Self::Error> {
    if !self.latency.is_zero() {
      std::thread::sleep(self.latency);
    }

    let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
    let recorded = &self.frames[index];
    let threshold = f64::from(confidence);

    let keep: Vec<usize> = recorded
      .boxes
      .iter()
      .enumerate()
      .filter(|(_, item)| item.confidence >= threshold)
      .map(|(i, _)| i)
      .collect();

    let boxes = keep.iter().map(|&i| recorded.boxes[i].clone()).collect();
    let masks = match &recorded.masks {
      Some(masks) if masks.len() == recorded.boxes.len() => {
        Some(keep.iter().map(|&i| masks[i].clone()).collect())
      }
      other => other.clone(),
    };

    Ok(RawFrameResult { boxes, masks })
  }

  fn class_names(&self) -> &ClassNames {
    &self.names
  }
}
