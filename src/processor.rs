// 该文件是 Shanan （山南西风） 项目的一部分。
// src/processor.rs - 单飞帧处理器
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

//! 帧处理器。
//!
//! 同一时刻最多只有一次推理在执行：[`FrameProcessor::submit`] 在推理进行中
//! 直接丢弃新帧而不排队。推理本身在阻塞线程池中运行，异步调度线程不会被占用。
//! 单帧推理失败时返回空结果，流水线继续运行。

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::{
  backend::{Backend, BackendCapability, BoxError, InferenceModel},
  config::{ConfigError, ServiceConfig},
  decode::{DecodeError, DetectionBatch, decode},
  frame::BgrFrame,
  metrics::{MetricsAggregator, MetricsSnapshot},
  model::{InitializationError, LoadState, ModelLoader},
};

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("检测后端不可用: {0}")]
  BackendUnavailable(String),
  #[error("模型初始化失败: {0}")]
  Initialization(#[from] InitializationError),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
}

/// 单帧推理错误，只在处理器内部记录，不向调用方传播
#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("后端推理失败: {0}")]
  Backend(#[source] BoxError),
  #[error("结果解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("推理任务异常退出: {0}")]
  Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
  Processed,
  /// 已有推理在执行，帧被丢弃
  Dropped,
}

pub struct FrameProcessor<B: Backend> {
  loader: Arc<ModelLoader<B>>,
  gate: Arc<Semaphore>,
  current: RwLock<Arc<DetectionBatch>>,
  metrics: Mutex<MetricsAggregator>,
}

impl<B: Backend> FrameProcessor<B> {
  /// 后端不可用时立即失败，而不是等到第一次推理
  pub fn new(capability: BackendCapability<B>, config: ServiceConfig) -> Result<Self, ServiceError> {
    let backend = capability.into_backend().map_err(|reason| {
      error!("检测后端不可用: {}", reason);
      ServiceError::BackendUnavailable(reason)
    })?;

    info!(
      "创建帧处理器，模型: {}，置信度阈值: {}",
      config.model_path(),
      config.confidence()
    );

    Ok(Self {
      loader: Arc::new(ModelLoader::new(backend, config)),
      gate: Arc::new(Semaphore::new(1)),
      current: RwLock::new(Arc::new(DetectionBatch::new())),
      metrics: Mutex::new(MetricsAggregator::new()),
    })
  }

  pub fn config(&self) -> &ServiceConfig {
    self.loader.config()
  }

  pub fn state(&self) -> LoadState {
    self.loader.state()
  }

  /// 在阻塞线程池中加载并预热模型，已就绪时不做任何事
  pub async fn initialize(&self) -> Result<(), ServiceError> {
    self.ensure_ready().await?;
    Ok(())
  }

  async fn ensure_ready(&self) -> Result<Arc<B::Model>, InitializationError> {
    if let Some(model) = self.loader.model() {
      return Ok(model);
    }

    let loader = Arc::clone(&self.loader);
    tokio::task::spawn_blocking(move || loader.initialize()).await?
  }

  /// 对单帧执行推理。
  ///
  /// 首次调用时会加载模型，加载失败返回 [`ServiceError::Initialization`]。
  /// 推理或解码失败只记录日志并返回空结果，统计数据保持不变。
  pub async fn detect(&self, frame: BgrFrame) -> Result<DetectionBatch, ServiceError> {
    let (batch, _) = self.detect_with(frame, None).await?;
    Ok(batch)
  }

  async fn detect_with(
    &self,
    frame: BgrFrame,
    permit: Option<OwnedSemaphorePermit>,
  ) -> Result<(DetectionBatch, Option<OwnedSemaphorePermit>), ServiceError> {
    let model = self.ensure_ready().await?;

    let now = Instant::now();
    let (result, permit) = self.run_inference(model, frame, permit).await;
    match result {
      Ok(batch) => {
        let elapsed = now.elapsed();
        self.metrics.lock().record(elapsed);
        debug!("推理完成，耗时: {:.2?}，检测到 {} 个目标", elapsed, batch.len());
        Ok((batch, permit))
      }
      Err(e) => {
        error!("目标检测出错: {}", e);
        Ok((DetectionBatch::new(), permit))
      }
    }
  }

  /// 许可随推理线程一起移动：等待方被取消时，许可在后端调用返回后才释放。
  async fn run_inference(
    &self,
    model: Arc<B::Model>,
    frame: BgrFrame,
    permit: Option<OwnedSemaphorePermit>,
  ) -> (
    Result<DetectionBatch, InferenceError>,
    Option<OwnedSemaphorePermit>,
  ) {
    let confidence = self.loader.config().confidence();
    let worker = tokio::task::spawn_blocking(move || {
      let result = model
        .infer(&frame, confidence)
        .map_err(|e| InferenceError::Backend(Box::new(e)))
        .and_then(|raw| decode(&raw, model.class_names()).map_err(InferenceError::from));
      (result, permit)
    });

    match worker.await {
      Ok(output) => output,
      Err(e) => (Err(InferenceError::from(e)), None),
    }
  }

  /// 提交一帧后立即返回。
  ///
  /// 已有推理在执行时丢弃该帧；否则在新任务中完成推理并替换当前结果。
  /// 必须在 Tokio 运行时中调用。
  pub fn submit(self: &Arc<Self>, frame: BgrFrame) {
    let Some(permit) = self.try_enter() else {
      return;
    };

    let processor = Arc::clone(self);
    tokio::spawn(async move {
      if let Err(e) = processor.run_gated(permit, frame).await {
        warn!("帧处理失败，保留上一次结果: {}", e);
      }
    });
  }

  /// 与 [`submit`](Self::submit) 相同的单飞处理，但等待处理完成。
  ///
  /// 在等待期间丢弃该 future 不会取消已开始的推理，闸门保持关闭直到推理结束，
  /// 当前结果也不会被替换。
  pub async fn process_frame(&self, frame: BgrFrame) -> Result<FrameOutcome, ServiceError> {
    let Some(permit) = self.try_enter() else {
      return Ok(FrameOutcome::Dropped);
    };

    self.run_gated(permit, frame).await?;
    Ok(FrameOutcome::Processed)
  }

  fn try_enter(&self) -> Option<OwnedSemaphorePermit> {
    match Arc::clone(&self.gate).try_acquire_owned() {
      Ok(permit) => Some(permit),
      Err(_) => {
        self.metrics.lock().record_dropped();
        None
      }
    }
  }

  async fn run_gated(
    &self,
    permit: OwnedSemaphorePermit,
    frame: BgrFrame,
  ) -> Result<(), ServiceError> {
    let (batch, _permit) = self.detect_with(frame, Some(permit)).await?;
    *self.current.write() = Arc::new(batch);
    Ok(())
  }

  /// 是否有推理正在执行
  pub fn is_busy(&self) -> bool {
    self.gate.available_permits() == 0
  }

  pub fn current_detections(&self) -> Arc<DetectionBatch> {
    self.current.read().clone()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.metrics.lock().snapshot()
  }
}
