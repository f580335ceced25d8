// 该文件是 Shanan （山南西风） 项目的一部分。
// src/metrics.rs - 推理耗时统计
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

use std::time::Duration;

use serde::Serialize;

/// 自进程启动以来的累计统计，不做衰减或窗口
#[derive(Debug, Default, Clone)]
pub struct MetricsAggregator {
  last_latency: f64,
  total_latency: f64,
  total_inferences: u64,
  dropped_frames: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
  pub last_latency_ms: f64,
  pub avg_latency_ms: f64,
  /// 完成的推理次数，而不是检测到的目标数
  #[serde(rename = "total_detections")]
  pub total_inferences: u64,
  pub dropped_frames: u64,
}

impl MetricsAggregator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&mut self, latency: Duration) {
    let seconds = latency.as_secs_f64();
    self.last_latency = seconds;
    self.total_latency += seconds;
    self.total_inferences += 1;
  }

  pub fn record_dropped(&mut self) {
    self.dropped_frames += 1;
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    let avg_latency = if self.total_inferences > 0 {
      self.total_latency / self.total_inferences as f64
    } else {
      0.0
    };

    MetricsSnapshot {
      last_latency_ms: self.last_latency * 1000.0,
      avg_latency_ms: avg_latency * 1000.0,
      total_inferences: self.total_inferences,
      dropped_frames: self.dropped_frames,
    }
  }
}
