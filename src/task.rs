// 该文件是 SegServe 项目的一部分。
// src/task.rs - 请求服务循环
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

use std::{
  io::Write,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  model::{ContractError, Model, Segmentation},
  normalize::{self, NormalizeError},
  output::{OutputError, OutputKind, Render},
  transport::{FrameWriter, TransportError},
  wire::{self, Request, WireError},
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum ServeError {
  #[error("传输错误: {0}")]
  Transport(#[from] TransportError),
  #[error("消息错误: {0}")]
  Wire(#[from] WireError),
  #[error("输入退化: {0}")]
  Degenerate(#[from] NormalizeError),
  #[error("推理失败: {0}")]
  Inference(Box<dyn std::error::Error + Send + Sync>),
  #[error("模型输出违反约定: {0}")]
  Contract(#[from] ContractError),
}

impl From<OutputError> for ServeError {
  fn from(err: OutputError) -> Self {
    match err {
      OutputError::Contract(e) => ServeError::Contract(e),
      OutputError::Wire(e) => ServeError::Wire(e),
    }
  }
}

impl ServeError {
  /// 传输、推理与模型约定错误会终止循环；消息内容错误只影响当前请求
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      ServeError::Transport(_) | ServeError::Inference(_) | ServeError::Contract(_)
    )
  }
}

/// 单个请求出错时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RejectPolicy {
  /// 回复空结果，让对端不再阻塞等待
  #[default]
  Reply,
  /// 只记录日志，不回复
  Skip,
  /// 终止服务
  Abort,
}

/// 外部停止信号，在两个请求之间检查
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
  flag: Arc<AtomicBool>,
}

impl Shutdown {
  pub fn trigger(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_triggered(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }

  /// 安装 Ctrl-C 处理器
  ///
  /// 阻塞在读取上的循环无法被打断，因此收到信号 `grace` 之后强制退出。
  pub fn install(grace: Duration) -> Result<Self, ctrlc::Error> {
    let shutdown = Shutdown::default();
    let handle = shutdown.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      handle.trigger();
      thread::spawn(move || {
        thread::sleep(grace);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(shutdown)
  }
}

#[derive(Default, Debug)]
pub struct ServeTask {
  output: OutputKind,
  on_reject: RejectPolicy,
  shutdown: Shutdown,
}

impl ServeTask {
  pub fn with_output(mut self, output: OutputKind) -> Self {
    self.output = output;
    self
  }

  pub fn with_reject_policy(mut self, on_reject: RejectPolicy) -> Self {
    self.on_reject = on_reject;
    self
  }

  pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
    self.shutdown = shutdown;
    self
  }

  /// 处理一帧请求，返回响应消息体
  pub fn serve_one<M, ME>(&self, frame: &[u8], model: &M) -> Result<Vec<u8>, ServeError>
  where
    ME: std::error::Error + Send + Sync + 'static,
    M: Model<Input = Request, Output = Segmentation, Error = ME>,
  {
    let mut request = wire::decode_input(frame)?;
    info!("收到图像 {:?}, 设置 {} 字节", request.image.dim(), request.settings.len());

    let moments = normalize::standardize(&mut request.image)?;
    debug!("标准化: 均值 {:.4}, 标准差 {:.4}", moments.mean, moments.std);

    let now = Instant::now();
    let result = model
      .infer(&request)
      .map_err(|e| ServeError::Inference(Box::new(e)))?;
    info!("推理完成，{} 个实例，耗时: {:.2?}", result.scores.len(), now.elapsed());

    Ok(self.output.render_result(&result)?)
  }
}

impl<I, W, M, ME> Task<I, M, FrameWriter<W>> for ServeTask
where
  I: Iterator<Item = Result<Vec<u8>, TransportError>>,
  W: Write,
  ME: std::error::Error + Send + Sync + 'static,
  M: Model<Input = Request, Output = Segmentation, Error = ME>,
{
  type Error = ServeError;

  fn run_task(self, mut input: I, model: M, mut output: FrameWriter<W>) -> Result<(), Self::Error> {
    info!("开始服务...");
    let mut served = 0usize;
    let mut rejected = 0usize;

    loop {
      if self.shutdown.is_triggered() {
        warn!("中断信号接收，退出服务循环");
        break;
      }

      let Some(frame) = input.next() else {
        info!("输入流已关闭");
        break;
      };
      let frame = frame.inspect_err(|e| error!("读取请求失败: {}", e))?;

      match self.serve_one(&frame, &model) {
        Ok(body) => {
          output.write_frame(&body)?;
          served += 1;
          debug!("已发送第 {} 个响应, {} 字节", served, body.len());
        }
        Err(e) if e.is_fatal() => {
          error!("请求处理失败: {}", e);
          return Err(e);
        }
        Err(e) => {
          rejected += 1;
          match self.on_reject {
            RejectPolicy::Reply => {
              warn!("拒绝请求，回复空结果: {}", e);
              output.write_frame(&self.output.render_empty()?)?;
            }
            RejectPolicy::Skip => warn!("拒绝请求，跳过: {}", e),
            RejectPolicy::Abort => {
              error!("拒绝请求，终止服务: {}", e);
              return Err(e);
            }
          }
        }
      }
    }

    info!("服务结束: 完成 {} 个请求, 拒绝 {} 个", served, rejected);
    Ok(())
  }
}
