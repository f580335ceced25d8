// 该文件是 Shanan （山南西风） 项目的一部分。
// src/decode.rs - 推理结果解码
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::backend::{ClassNames, RawFrameResult};

const BOX_DECIMALS: i32 = 1;
const CONF_DECIMALS: i32 = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
  #[error("未知类别编号: {0}")]
  UnknownClass(u32),
  #[error("分割结果数量不匹配: 目标 {boxes} 个, 轮廓 {masks} 个")]
  MaskCountMismatch { boxes: usize, masks: usize },
}

/// 下游服务使用的检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  #[serde(rename = "box")]
  pub bbox: [f64; 4], // [x_min, y_min, x_max, y_max]
  pub label: String,
  pub class_id: u32,
  #[serde(rename = "conf")]
  pub confidence: f64,
  #[serde(rename = "mask", default, skip_serializing_if = "Option::is_none")]
  pub polygon: Option<Vec<[f64; 2]>>,
}

/// 一次推理产生的全部检测结果，保持后端给出的顺序
pub type DetectionBatch = Vec<Detection>;

/// 恰好位于中点时取偶数，`10.25 -> 10.2`，`0.125 -> 0.12`
fn round_to(value: f64, decimals: i32) -> f64 {
  let scale = 10f64.powi(decimals);
  (value * scale).round_ties_even() / scale
}

pub fn decode(raw: &RawFrameResult, names: &ClassNames) -> Result<DetectionBatch, DecodeError> {
  if let Some(masks) = &raw.masks {
    if masks.len() != raw.boxes.len() {
      return Err(DecodeError::MaskCountMismatch {
        boxes: raw.boxes.len(),
        masks: masks.len(),
      });
    }
  }

  let mut detections = Vec::with_capacity(raw.boxes.len());
  for (i, item) in raw.boxes.iter().enumerate() {
    let label = names
      .get(item.class_id)
      .ok_or(DecodeError::UnknownClass(item.class_id))?;

    let polygon = raw
      .masks
      .as_ref()
      .map(|masks| &masks[i])
      .filter(|segment| !segment.is_empty())
      .cloned();

    detections.push(Detection {
      bbox: item.xyxy.map(|c| round_to(c, BOX_DECIMALS)),
      label: label.to_string(),
      class_id: item.class_id,
      confidence: round_to(item.confidence, CONF_DECIMALS),
      polygon,
    });
  }

  debug!("解码得到 {} 个目标", detections.len());
  Ok(detections)
}
