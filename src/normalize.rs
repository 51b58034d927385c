// 该文件是 SegServe 项目的一部分。
// src/normalize.rs - 图像标准化
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

use ndarray::{ArrayBase, DataMut, Dimension};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum NormalizeError {
  #[error("图像为空")]
  Empty,
  #[error("图像方差为零或非有限值, 无法标准化 (均值 {mean}, 标准差 {std})")]
  Degenerate { mean: f64, std: f64 },
}

/// 标准化前的统计量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
  pub mean: f64,
  pub std: f64,
}

/// 总体均值与标准差，在 f64 下累加
pub fn moments<S, D>(image: &ArrayBase<S, D>) -> Result<Moments, NormalizeError>
where
  S: ndarray::Data<Elem = f32>,
  D: Dimension,
{
  let values = image.mapv(f64::from);
  let mean = values.mean().ok_or(NormalizeError::Empty)?;
  let std = values.std(0.0);

  Ok(Moments { mean, std })
}

/// 原地计算 `(img - mean) / std`，零方差时拒绝而不是产出 NaN/Inf
pub fn standardize<S, D>(image: &mut ArrayBase<S, D>) -> Result<Moments, NormalizeError>
where
  S: DataMut<Elem = f32>,
  D: Dimension,
{
  let m = moments(image)?;
  // NaN 输入会让 std 变为 NaN，同样视为退化
  if !(m.std.is_finite() && m.std > 0.0) {
    return Err(NormalizeError::Degenerate { mean: m.mean, std: m.std });
  }

  let scaled_ok = image
    .iter()
    .all(|&v| ((v as f64 - m.mean) / m.std).abs() <= f32::MAX as f64);
  if !scaled_ok {
    return Err(NormalizeError::Degenerate { mean: m.mean, std: m.std });
  }

  image.mapv_inplace(|v| ((v as f64 - m.mean) / m.std) as f32);
  Ok(m)
}
