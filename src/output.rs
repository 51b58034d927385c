// 该文件是 SegServe 项目的一部分。
// src/output.rs - 响应消息生成
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

use ndarray::Array2;
use thiserror::Error;

use crate::{
  model::{ContractError, Segmentation},
  wire::{self, WireError},
};

pub trait Render<Output>: Sized {
  type Error;
  fn render_result(&self, result: &Output) -> Result<Vec<u8>, Self::Error>;
  /// 请求被拒绝时回复的空结果
  fn render_empty(&self) -> Result<Vec<u8>, Self::Error>;
}

mod polygon;
pub use self::polygon::trace_outlines;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("模型输出违反约定: {0}")]
  Contract(#[from] ContractError),
  #[error("编码错误: {0}")]
  Wire(#[from] WireError),
}

/// 响应消息类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputKind {
  /// 标签图与量化分数图
  #[default]
  Label,
  /// 每个实例的外轮廓多边形
  Polygon,
}

impl Render<Segmentation> for OutputKind {
  type Error = OutputError;

  fn render_result(&self, result: &Segmentation) -> Result<Vec<u8>, Self::Error> {
    match self {
      OutputKind::Label => {
        let score = result.score_image()?;
        Ok(wire::encode_result(result.label.view(), score.view())?)
      }
      OutputKind::Polygon => {
        result.validate()?;
        let outlines = trace_outlines(&result.label, result.scores.len());
        Ok(wire::encode_polygon_result(&outlines, &result.scores)?)
      }
    }
  }

  fn render_empty(&self) -> Result<Vec<u8>, Self::Error> {
    match self {
      OutputKind::Label => Ok(wire::encode_result(
        Array2::<i32>::zeros((0, 0)).view(),
        Array2::<f32>::zeros((0, 0)).view(),
      )?),
      OutputKind::Polygon => Ok(wire::encode_polygon_result(&[], &[])?),
    }
  }
}
