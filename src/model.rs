// 该文件是 SegServe 项目的一部分。
// src/model.rs - 模型
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
use url::Url;

use crate::{FromUrl, wire::Request};

/// 推理接口，模型加载后只读
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 实例分割结果
///
/// `label` 中 0 为背景，正数为实例编号 `1..=scores.len()`，
/// `scores[id - 1]` 为对应实例的置信度。
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
  pub label: Array2<i32>,
  pub scores: Vec<f32>,
}

#[derive(Error, Debug, PartialEq)]
pub enum ContractError {
  #[error("标签最大值 {max_label} 与实例分数数量 {scores} 不一致")]
  InstanceCountMismatch { max_label: i32, scores: usize },
  #[error("出现负数标签 {0}")]
  NegativeLabel(i32),
  #[error("分数图形状 {score:?} 与标签形状 {label:?} 不一致")]
  ShapeMismatch {
    label: (usize, usize),
    score: (usize, usize),
  },
}

impl Segmentation {
  pub fn max_label(&self) -> i32 {
    self.label.iter().copied().max().unwrap_or(0)
  }

  pub fn validate(&self) -> Result<(), ContractError> {
    if let Some(&neg) = self.label.iter().find(|&&v| v < 0) {
      return Err(ContractError::NegativeLabel(neg));
    }
    let max_label = self.max_label();
    if max_label as usize != self.scores.len() {
      return Err(ContractError::InstanceCountMismatch {
        max_label,
        scores: self.scores.len(),
      });
    }
    Ok(())
  }

  /// 将实例分数展开为逐像素分数图，背景为 0
  pub fn score_image(&self) -> Result<Array2<f32>, ContractError> {
    self.validate()?;
    let score = self.label.mapv(|id| {
      if id > 0 {
        self.scores[(id - 1) as usize]
      } else {
        0.0
      }
    });
    if score.dim() != self.label.dim() {
      return Err(ContractError::ShapeMismatch {
        label: self.label.dim(),
        score: score.dim(),
      });
    }
    Ok(score)
  }
}

#[cfg(feature = "model_threshold")]
mod threshold;
#[cfg(feature = "model_threshold")]
pub use self::threshold::{ThresholdError, ThresholdModel};

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_threshold")]
  #[error("阈值模型错误: {0}")]
  ThresholdError(#[from] ThresholdError),
  #[error("模型参数错误: {name} = {value}")]
  InvalidParameter { name: String, value: String },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择的模型
pub enum ModelWrapper {
  #[cfg(feature = "model_threshold")]
  Threshold(ThresholdModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_threshold")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ThresholdModel::SCHEME {
        return Ok(ModelWrapper::Threshold(ThresholdModel::from_url(url)?));
      }
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Model for ModelWrapper {
  type Input = Request;
  type Output = Segmentation;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      #[cfg(feature = "model_threshold")]
      ModelWrapper::Threshold(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn score_image_is_zero_on_background() {
    let seg = Segmentation {
      label: array![[0, 1, 1], [2, 0, 2]],
      scores: vec![0.5, 0.25],
    };
    let score = seg.score_image().unwrap();
    assert_eq!(score, array![[0.0, 0.5, 0.5], [0.25, 0.0, 0.25]]);
  }

  #[test]
  fn all_background_needs_no_scores() {
    let seg = Segmentation {
      label: Array2::zeros((3, 3)),
      scores: vec![],
    };
    assert!(seg.score_image().unwrap().iter().all(|&v| v == 0.0));
  }

  #[test]
  fn score_count_must_match_max_label() {
    let seg = Segmentation {
      label: array![[0, 3]],
      scores: vec![0.5, 0.5],
    };
    assert_eq!(
      seg.score_image().unwrap_err(),
      ContractError::InstanceCountMismatch {
        max_label: 3,
        scores: 2
      }
    );
  }

  #[test]
  fn negative_label_is_contract_violation() {
    let seg = Segmentation {
      label: array![[0, -1]],
      scores: vec![],
    };
    assert_eq!(seg.validate().unwrap_err(), ContractError::NegativeLabel(-1));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("onnx:///models/cyto.onnx").unwrap();
    assert!(matches!(ModelWrapper::from_url(&url), Err(ModelError::SchemeMismatch(s)) if s == "onnx"));
  }
}
