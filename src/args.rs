// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use url::Url;

/// Shanan 检测服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，方案决定推理后端，例如:
  /// - replay:///data/cam0.jsonl
  /// - replay:///data/cam0.jsonl?confidence=0.4
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 置信度阈值 (0.0 - 1.0)，覆盖模型地址中的设置
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// 输入图像，可重复指定，例如 image:///data/frame.png；
  /// 未指定时使用空白帧
  #[arg(long, value_name = "SOURCE")]
  pub input: Vec<Url>,

  /// 提交帧的间隔（毫秒）
  #[arg(long, default_value = "33", value_name = "MILLIS")]
  pub interval_ms: u64,

  /// 最大提交帧数，0 表示直到收到中断信号
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,
}
