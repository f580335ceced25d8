// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型加载与预热
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

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  backend::{Backend, BoxError, InferenceModel},
  config::ServiceConfig,
  frame::BgrFrame,
};

#[derive(Error, Debug)]
pub enum InitializationError {
  #[error("模型加载失败 ({path}): {source}")]
  Load {
    path: String,
    #[source]
    source: BoxError,
  },
  #[error("模型预热失败: {source}")]
  Warmup {
    #[source]
    source: BoxError,
  },
  #[error("初始化任务异常退出: {0}")]
  Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
  Uninitialized,
  Loading,
  Ready,
  /// 上一次加载失败的原因，可再次尝试
  Failed(String),
}

enum Slot<M> {
  Uninitialized,
  Loading,
  Ready(Arc<M>),
  Failed(String),
}

/// 加载期间后端 panic 时把状态置为 Failed
struct LoadingGuard<'a, M> {
  slot: &'a RwLock<Slot<M>>,
  finished: bool,
}

impl<M> LoadingGuard<'_, M> {
  fn finish(mut self, slot: Slot<M>) {
    *self.slot.write() = slot;
    self.finished = true;
  }
}

impl<M> Drop for LoadingGuard<'_, M> {
  fn drop(&mut self) {
    if !self.finished {
      *self.slot.write() = Slot::Failed("模型加载过程中发生 panic".to_string());
    }
  }
}

/// 延迟加载模型并负责其状态转换
pub struct ModelLoader<B: Backend> {
  backend: B,
  config: ServiceConfig,
  slot: RwLock<Slot<B::Model>>,
  init_lock: Mutex<()>,
}

impl<B: Backend> ModelLoader<B> {
  pub fn new(backend: B, config: ServiceConfig) -> Self {
    Self {
      backend,
      config,
      slot: RwLock::new(Slot::Uninitialized),
      init_lock: Mutex::new(()),
    }
  }

  pub fn config(&self) -> &ServiceConfig {
    &self.config
  }

  pub fn state(&self) -> LoadState {
    match &*self.slot.read() {
      Slot::Uninitialized => LoadState::Uninitialized,
      Slot::Loading => LoadState::Loading,
      Slot::Ready(_) => LoadState::Ready,
      Slot::Failed(reason) => LoadState::Failed(reason.clone()),
    }
  }

  /// 已就绪时返回模型句柄
  pub fn model(&self) -> Option<Arc<B::Model>> {
    match &*self.slot.read() {
      Slot::Ready(model) => Some(Arc::clone(model)),
      _ => None,
    }
  }

  /// 加载并预热模型，已就绪时直接返回。
  ///
  /// 阻塞调用；并发的首次调用会排队等待同一次加载。
  pub fn initialize(&self) -> Result<Arc<B::Model>, InitializationError> {
    if let Some(model) = self.model() {
      return Ok(model);
    }

    let _guard = self.init_lock.lock();
    if let Some(model) = self.model() {
      return Ok(model);
    }

    *self.slot.write() = Slot::Loading;
    let loading = LoadingGuard {
      slot: &self.slot,
      finished: false,
    };
    info!("加载模型: {}", self.config.model_path());
    let now = Instant::now();

    let (slot, result) = match self.load_and_warm_up() {
      Ok(model) => {
        let model = Arc::new(model);
        info!("模型加载完成，耗时: {:.2?}", now.elapsed());
        (Slot::Ready(Arc::clone(&model)), Ok(model))
      }
      Err(e) => {
        error!("模型加载失败: {}", e);
        (Slot::Failed(e.to_string()), Err(e))
      }
    };
    loading.finish(slot);
    result
  }

  fn load_and_warm_up(&self) -> Result<B::Model, InitializationError> {
    let model = self
      .backend
      .load(self.config.model_path())
      .map_err(|e| InitializationError::Load {
        path: self.config.model_path().to_string(),
        source: Box::new(e),
      })?;
    debug!("模型类别数量: {}", model.class_names().len());

    let (width, height) = self.config.warmup_size();
    debug!("使用 {}x{} 空白帧预热模型", width, height);
    model
      .infer(&BgrFrame::blank(width, height), self.config.confidence())
      .map_err(|e| InitializationError::Warmup {
        source: Box::new(e),
      })?;

    Ok(model)
  }
}

#[cfg(test)]
mod tests {
  use std::panic::{self, AssertUnwindSafe};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;
  use std::time::Duration;

  use super::*;
  use crate::backend::{ClassNames, RawFrameResult};

  #[derive(Error, Debug)]
  #[error("{0}")]
  struct FakeError(&'static str);

  #[derive(Debug)]
  struct FakeModel {
    names: ClassNames,
    warmups: Arc<Mutex<Vec<(usize, usize)>>>,
    fail_warmup: bool,
  }

  impl InferenceModel for FakeModel {
    type Error = FakeError;

    fn infer(&self, frame: &BgrFrame, _confidence: f32) -> Result<RawFrameResult, Self::Error> {
      self.warmups.lock().push((frame.width(), frame.height()));
      if self.fail_warmup {
        return Err(FakeError("warm-up exploded"));
      }
      Ok(RawFrameResult::empty())
    }

    fn class_names(&self) -> &ClassNames {
      &self.names
    }
  }

  #[derive(Default)]
  struct FakeBackend {
    loads: Arc<AtomicUsize>,
    failing_loads: AtomicUsize,
    fail_warmup: bool,
    panic_on_load: bool,
    load_delay: Duration,
    warmups: Arc<Mutex<Vec<(usize, usize)>>>,
  }

  impl Backend for FakeBackend {
    type Model = FakeModel;
    type Error = FakeError;

    fn load(&self, _model_path: &str) -> Result<Self::Model, Self::Error> {
      self.loads.fetch_add(1, Ordering::SeqCst);
      thread::sleep(self.load_delay);
      if self.panic_on_load {
        panic!("driver crashed while loading");
      }
      if self
        .failing_loads
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
      {
        return Err(FakeError("no such model"));
      }
      Ok(FakeModel {
        names: ClassNames::coco(),
        warmups: Arc::clone(&self.warmups),
        fail_warmup: self.fail_warmup,
      })
    }
  }

  #[test]
  fn initialize_is_idempotent() {
    let backend = FakeBackend::default();
    let loads = Arc::clone(&backend.loads);
    let warmups = Arc::clone(&backend.warmups);
    let loader = ModelLoader::new(backend, ServiceConfig::default());

    assert_eq!(loader.state(), LoadState::Uninitialized);
    loader.initialize().unwrap();
    loader.initialize().unwrap();

    assert_eq!(loader.state(), LoadState::Ready);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(*warmups.lock(), vec![(640, 640)]);
  }

  #[test]
  fn failed_load_can_be_retried() {
    let backend = FakeBackend {
      failing_loads: AtomicUsize::new(1),
      ..Default::default()
    };
    let loads = Arc::clone(&backend.loads);
    let loader = ModelLoader::new(backend, ServiceConfig::default());

    let err = loader.initialize().unwrap_err();
    assert!(matches!(err, InitializationError::Load { .. }));
    assert!(matches!(loader.state(), LoadState::Failed(_)));
    assert!(loader.model().is_none());

    loader.initialize().unwrap();
    assert_eq!(loader.state(), LoadState::Ready);
    assert_eq!(loads.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn warmup_failure_leaves_model_unready() {
    let backend = FakeBackend {
      fail_warmup: true,
      ..Default::default()
    };
    let loader = ModelLoader::new(backend, ServiceConfig::default());

    let err = loader.initialize().unwrap_err();
    assert!(matches!(err, InitializationError::Warmup { .. }));
    assert_eq!(
      loader.state(),
      LoadState::Failed("模型预热失败: warm-up exploded".to_string())
    );
  }

  #[test]
  fn panicking_load_is_reported_as_failed() {
    let backend = FakeBackend {
      panic_on_load: true,
      ..Default::default()
    };
    let loader = ModelLoader::new(backend, ServiceConfig::default());

    let result = panic::catch_unwind(AssertUnwindSafe(|| loader.initialize()));
    assert!(result.is_err());
    assert!(matches!(loader.state(), LoadState::Failed(_)));
    assert!(loader.model().is_none());
  }

  #[test]
  fn concurrent_first_calls_load_once() {
    let backend = FakeBackend {
      load_delay: Duration::from_millis(50),
      ..Default::default()
    };
    let loads = Arc::clone(&backend.loads);
    let loader = Arc::new(ModelLoader::new(backend, ServiceConfig::default()));

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let loader = Arc::clone(&loader);
        thread::spawn(move || loader.initialize().map(|_| ()))
      })
      .collect();
    for handle in handles {
      handle.join().unwrap().unwrap();
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn warmup_uses_configured_size() {
    let backend = FakeBackend::default();
    let warmups = Arc::clone(&backend.warmups);
    let config = ServiceConfig::default().with_warmup_size(320, 240).unwrap();
    let loader = ModelLoader::new(backend, config);

    loader.initialize().unwrap();
    assert_eq!(*warmups.lock(), vec![(320, 240)]);
  }
}
