// 该文件是 SegServe 项目的一部分。
// src/model/threshold.rs - 阈值连通域分割模型
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

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use ndarray::{Array2, Axis};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Model, ModelError, Segmentation},
  wire::Request,
};

const DEFAULT_LEVEL: f32 = 0.0;
const DEFAULT_MIN_AREA: usize = 1;

#[derive(Error, Debug)]
pub enum ThresholdError {
  #[error("图像通道数为 0")]
  NoChannel,
  #[error("图像尺寸 {0}x{1} 超出 u32")]
  TooLarge(usize, usize),
  #[error("实例数量 {0} 超出 int32")]
  TooManyInstances(usize),
}

/// 对通道均值图做阈值化，再按 4 邻域连通域划分实例
///
/// 实例编号按光栅顺序分配，分数为连通域内平均强度的 sigmoid。
#[derive(Debug, Clone)]
pub struct ThresholdModel {
  level: f32,
  min_area: usize,
}

impl Default for ThresholdModel {
  fn default() -> Self {
    Self {
      level: DEFAULT_LEVEL,
      min_area: DEFAULT_MIN_AREA,
    }
  }
}

impl FromUrlWithScheme for ThresholdModel {
  const SCHEME: &'static str = "threshold";
}

fn parse_param<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ModelError> {
  value.parse().map_err(|_| ModelError::InvalidParameter {
    name: name.to_string(),
    value: value.to_string(),
  })
}

impl FromUrl for ThresholdModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut model = ThresholdModel::default();
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "level" => model.level = parse_param(&k, &v)?,
        "min_area" => model.min_area = parse_param(&k, &v)?,
        _ => {
          return Err(ModelError::InvalidParameter {
            name: k.to_string(),
            value: v.to_string(),
          });
        }
      }
    }

    info!("阈值模型: level = {}, min_area = {}", model.level, model.min_area);
    Ok(model)
  }
}

impl ThresholdModel {
  pub fn segment(&self, plane: &Array2<f32>) -> Result<Segmentation, ThresholdError> {
    let (height, width) = plane.dim();
    let too_large = |_| ThresholdError::TooLarge(height, width);
    let (w, h) = (u32::try_from(width).map_err(too_large)?, u32::try_from(height).map_err(too_large)?);

    let binary = GrayImage::from_fn(w, h, |x, y| {
      Luma([if plane[[y as usize, x as usize]] > self.level { 255 } else { 0 }])
    });
    // 连通域编号从 1 开始，按光栅顺序首次出现的先后分配
    let components = connected_components(&binary, Connectivity::Four, Luma([0u8]));

    let mut area = Vec::<usize>::new();
    let mut sum = Vec::<f64>::new();
    for (x, y, pixel) in components.enumerate_pixels() {
      let c = pixel[0] as usize;
      if c == 0 {
        continue;
      }
      if c > area.len() {
        area.resize(c, 0);
        sum.resize(c, 0.0);
      }
      area[c - 1] += 1;
      sum[c - 1] += plane[[y as usize, x as usize]] as f64;
    }

    // 过滤小连通域后重新编号，保持光栅顺序
    let mut ids = vec![0i32; area.len()];
    let mut scores = Vec::new();
    let mut label = Array2::<i32>::zeros((height, width));
    for (x, y, pixel) in components.enumerate_pixels() {
      let c = pixel[0] as usize;
      if c == 0 || area[c - 1] < self.min_area {
        continue;
      }
      if ids[c - 1] == 0 {
        let next = scores.len() + 1;
        ids[c - 1] = i32::try_from(next).map_err(|_| ThresholdError::TooManyInstances(next))?;
        scores.push(sigmoid((sum[c - 1] / area[c - 1] as f64) as f32));
      }
      label[[y as usize, x as usize]] = ids[c - 1];
    }

    debug!("检测到 {} 个实例, 丢弃 {} 个小连通域", scores.len(), area.len() - scores.len());
    Ok(Segmentation { label, scores })
  }
}

impl Model for ThresholdModel {
  type Input = Request;
  type Output = Segmentation;
  type Error = ThresholdError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let plane = input.image.mean_axis(Axis(2)).ok_or(ThresholdError::NoChannel)?;
    self.segment(&plane)
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
