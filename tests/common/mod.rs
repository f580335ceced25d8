// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/common/mod.rs - 测试用脚本化后端
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

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use shanan_serve::{Backend, BgrFrame, ClassNames, InferenceModel, RawFrameResult};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
#[error("scripted failure: {0}")]
pub struct ScriptError(pub String);

type Script = dyn Fn(usize) -> Result<RawFrameResult, ScriptError> + Send + Sync;

/// 阻塞推理直到测试放行
#[derive(Default)]
pub struct Hold {
  armed: AtomicBool,
  open: Mutex<bool>,
  cv: Condvar,
}

impl Hold {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn arm(&self) {
    *self.open.lock().unwrap() = false;
    self.armed.store(true, Ordering::SeqCst);
  }

  pub fn release(&self) {
    *self.open.lock().unwrap() = true;
    self.cv.notify_all();
  }

  fn wait(&self) {
    if !self.armed.load(Ordering::SeqCst) {
      return;
    }
    let mut open = self.open.lock().unwrap();
    while !*open {
      open = self.cv.wait(open).unwrap();
    }
  }
}

/// 记录后端被调用的情况
#[derive(Clone, Default)]
pub struct Probe {
  pub loads: Arc<AtomicUsize>,
  pub calls: Arc<AtomicUsize>,
  pub frame_sizes: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl Probe {
  pub fn loads(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

pub struct ScriptedBackend {
  names: ClassNames,
  script: Arc<Script>,
  latency: Duration,
  hold: Option<Arc<Hold>>,
  failing_loads: AtomicUsize,
  probe: Probe,
}

impl ScriptedBackend {
  pub fn new<F>(script: F) -> Self
  where
    F: Fn(usize) -> Result<RawFrameResult, ScriptError> + Send + Sync + 'static,
  {
    Self {
      names: ClassNames::coco(),
      script: Arc::new(script),
      latency: Duration::ZERO,
      hold: None,
      failing_loads: AtomicUsize::new(0),
      probe: Probe::default(),
    }
  }

  /// 每次调用都返回同一个结果
  pub fn returning(result: RawFrameResult) -> Self {
    Self::new(move |_| Ok(result.clone()))
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  pub fn with_hold(mut self, hold: Arc<Hold>) -> Self {
    self.hold = Some(hold);
    self
  }

  pub fn with_failing_loads(self, count: usize) -> Self {
    self.failing_loads.store(count, Ordering::SeqCst);
    self
  }

  pub fn probe(&self) -> Probe {
    self.probe.clone()
  }
}

pub struct ScriptedModel {
  names: ClassNames,
  script: Arc<Script>,
  latency: Duration,
  hold: Option<Arc<Hold>>,
  probe: Probe,
}

impl Backend for ScriptedBackend {
  type Model = ScriptedModel;
  type Error = ScriptError;

  fn load(&self, model_path: &str) -> Result<Self::Model, Self::Error> {
    self.probe.loads.fetch_add(1, Ordering::SeqCst);
    if self
      .failing_loads
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok()
    {
      return Err(ScriptError(format!("cannot open {model_path}")));
    }

    Ok(ScriptedModel {
      names: self.names.clone(),
      script: Arc::clone(&self.script),
      latency: self.latency,
      hold: self.hold.clone(),
      probe: self.probe.clone(),
    })
  }
}

impl InferenceModel for ScriptedModel {
  type Error = ScriptError;

  fn infer(&self, frame: &BgrFrame, confidence: f32) -> Result<RawFrameResult, Self::Error> {
    let call = self.probe.calls.fetch_add(1, Ordering::SeqCst);
    self
      .probe
      .frame_sizes
      .lock()
      .unwrap()
      .push((frame.width(), frame.height()));

    if let Some(hold) = &self.hold {
      hold.wait();
    }
    std::thread::sleep(self.latency);

    let result = (self.script)(call)?;
    let threshold = f64::from(confidence);
    let keep: Vec<bool> = result
      .boxes
      .iter()
      .map(|item| item.confidence >= threshold)
      .collect();
    Ok(RawFrameResult {
      boxes: retain_kept(result.boxes, &keep),
      masks: result.masks.map(|masks| retain_kept(masks, &keep)),
    })
  }

  fn class_names(&self) -> &ClassNames {
    &self.names
  }
}

fn retain_kept<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
  items
    .into_iter()
    .zip(keep)
    .filter_map(|(item, &kept)| kept.then_some(item))
    .collect()
}

pub fn frame() -> BgrFrame {
  BgrFrame::blank(64, 48)
}

/// 轮询直到条件成立，超时则失败
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
  let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
  while !condition() {
    assert!(
      tokio::time::Instant::now() < deadline,
      "condition not reached within 5s"
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}
