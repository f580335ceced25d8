// 该文件是 Shanan （山南西风） 项目的一部分。
// src/backend.rs - 推理后端接口
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

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::frame::BgrFrame;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;


/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 类别编号到类别名称的映射表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassNames {
  names: BTreeMap<u32, String>,
}

impl ClassNames {
  pub fn coco() -> Self {
    COCO_CLASSES.into_iter().collect()
  }

  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.names.get(&class_id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl From<BTreeMap<u32, String>> for ClassNames {
  fn from(names: BTreeMap<u32, String>) -> Self {
    Self { names }
  }
}

/// 按顺序依次分配类别编号
impl<S: Into<String>> FromIterator<S> for ClassNames {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    let names = iter
      .into_iter()
      .enumerate()
      .map(|(id, name)| (id as u32, name.into()))
      .collect();
    Self { names }
  }
}

/// 后端给出的单个目标，坐标为原图像素
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawBox {
  pub xyxy: [f64; 4], // [x_min, y_min, x_max, y_max]
  pub confidence: f64,
  pub class_id: u32,
}

impl RawBox {
  pub fn new(xyxy: [f64; 4], confidence: f64, class_id: u32) -> Self {
    Self {
      xyxy,
      confidence,
      class_id,
    }
  }
}

/// 单帧的原始推理结果
///
/// `masks` 仅在分割模型下存在，并与 `boxes` 一一对应；
/// 某个目标没有分割轮廓时对应项为空。
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawFrameResult {
  pub boxes: Vec<RawBox>,
  #[serde(default)]
  pub masks: Option<Vec<Vec<[f64; 2]>>>,
}

impl RawFrameResult {
  pub fn empty() -> Self {
    Self::default()
  }
}

/// 已加载的模型，加载完成后只读共享
pub trait InferenceModel: Send + Sync + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 阻塞调用，由调用方负责移出异步调度线程
  fn infer(&self, frame: &BgrFrame, confidence: f32) -> Result<RawFrameResult, Self::Error>;
  fn class_names(&self) -> &ClassNames;
}

/// 推理后端：根据模型路径构造模型
pub trait Backend: Send + Sync + 'static {
  type Model: InferenceModel;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self, model_path: &str) -> Result<Self::Model, Self::Error>;
}

/// 进程启动时解析一次的后端可用性
#[derive(Debug)]
pub enum BackendCapability<B> {
  Available(B),
  Unavailable { reason: String },
}

impl<B> BackendCapability<B> {
  pub fn available(backend: B) -> Self {
    BackendCapability::Available(backend)
  }

  pub fn unavailable(reason: impl Into<String>) -> Self {
    BackendCapability::Unavailable {
      reason: reason.into(),
    }
  }

  pub fn is_available(&self) -> bool {
    matches!(self, BackendCapability::Available(_))
  }

  /// 不可用时返回原因
  pub fn into_backend(self) -> Result<B, String> {
    match self {
      BackendCapability::Available(backend) => Ok(backend),
      BackendCapability::Unavailable { reason } => Err(reason),
    }
  }
}

#[cfg(feature = "replay")]
pub mod replay;
