// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 检测服务演示程序
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

mod args;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use shanan_serve::{
  BgrFrame, FromUrl, FrameProcessor, ServiceConfig,
  backend::replay::ReplayBackend,
  config::DEFAULT_WARMUP_SIZE,
  input::ImageFileInput,
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型地址: {}", args.model);
  info!("提交间隔: {} ms", args.interval_ms);

  let mut config = ServiceConfig::from_url(&args.model)?;
  if let Some(confidence) = args.confidence {
    config = config.with_confidence(confidence)?;
  }
  info!("置信度阈值: {}", config.confidence());

  let capability = ReplayBackend::resolve(&args.model);
  let processor = Arc::new(FrameProcessor::new(capability, config)?);
  processor
    .initialize()
    .await
    .context("模型加载失败，拒绝启动服务")?;

  let frames = load_frames(&args.input)?;
  info!("输入帧数量: {}", frames.len());

  let running = Arc::new(AtomicBool::new(true));
  {
    let running = Arc::clone(&running);
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      running.store(false, Ordering::SeqCst);
    })?;
  }

  let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
  let mut submitted = 0u64;
  for frame in frames.iter().cycle() {
    if !running.load(Ordering::SeqCst) {
      warn!("中断信号接收，退出提交循环");
      break;
    }
    if args.max_frames > 0 && submitted >= args.max_frames {
      info!("达到指定帧数 {}, 退出提交循环", submitted);
      break;
    }

    ticker.tick().await;
    processor.submit(frame.clone());
    submitted += 1;

    let report = serde_json::json!({
      "frame": submitted,
      "detections": &*processor.current_detections(),
      "metrics": processor.metrics(),
    });
    println!("{}", report);
  }

  while processor.is_busy() {
    tokio::time::sleep(Duration::from_millis(10)).await;
  }

  println!("{}", serde_json::to_string(&processor.metrics())?);
  info!("任务完成，退出");
  Ok(())
}

fn load_frames(inputs: &[Url]) -> Result<Vec<BgrFrame>> {
  if inputs.is_empty() {
    return Ok(vec![BgrFrame::blank(DEFAULT_WARMUP_SIZE, DEFAULT_WARMUP_SIZE)]);
  }

  let mut frames = Vec::with_capacity(inputs.len());
  for url in inputs {
    let input =
      ImageFileInput::from_url(url).with_context(|| format!("无法打开输入来源: {}", url))?;
    frames.extend(input);
  }
  Ok(frames)
}
