// 该文件是 SegServe 项目的一部分。
// src/main.rs - 分割服务主程序
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use segserve::{
  FromUrl,
  model::ModelWrapper,
  output::OutputKind,
  task::{RejectPolicy, ServeTask, Shutdown, Task},
  transport::{DEFAULT_MAX_FRAME_LEN, FrameReader, FrameWriter},
};

/// SegServe 参数配置
///
/// 请求从标准输入读取，响应写到标准输出，日志只写标准错误。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 threshold://?level=0.5&min_area=16
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 响应类型
  #[arg(long, value_enum, default_value_t = OutputKind::Label)]
  pub output: OutputKind,

  /// 单个请求出错时的处理方式
  #[arg(long, value_enum, default_value_t = RejectPolicy::Reply)]
  pub on_reject: RejectPolicy,

  /// 单帧最大字节数
  #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN, value_name = "BYTES")]
  pub max_frame_bytes: usize,

  /// 收到中断信号后强制退出前的等待秒数
  #[arg(long, default_value = "30", value_name = "SECONDS")]
  pub grace_secs: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("响应类型: {:?}", args.output);
  info!("拒绝策略: {:?}", args.on_reject);

  let model = ModelWrapper::from_url(&args.model)?;
  info!("模型加载完成");

  let shutdown = Shutdown::install(Duration::from_secs(args.grace_secs))?;

  let input = FrameReader::new(std::io::stdin().lock()).with_max_frame_len(args.max_frame_bytes);
  let output = FrameWriter::buffered(std::io::stdout().lock());

  ServeTask::default()
    .with_output(args.output)
    .with_reject_policy(args.on_reject)
    .with_shutdown(shutdown)
    .run_task(input, model, output)?;

  Ok(())
}
