// 该文件是 SegServe 项目的一部分。
// src/wire.rs - 消息编解码
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

use byteorder::{BigEndian, ByteOrder};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use prost::Message;
use thiserror::Error;

pub mod message;
use self::message::{Image, Input, IntMatrix, MaskResult, Point, Polygon, PolygonResult};

/// 分数量化倍率，与对端约定
pub const SCORE_SCALE: f32 = 1000.0;

#[derive(Error, Debug)]
pub enum WireError {
  #[error("消息解析失败: {0}")]
  Decode(#[from] prost::DecodeError),
  #[error("消息缺少字段: {0}")]
  MissingField(&'static str),
  #[error("尺寸非法: {0}")]
  InvalidShape(String),
  #[error("数据长度不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("数值 {0} 超出 int16 可编码范围")]
  OutOfRange(f64),
  #[error("标签与分数形状不一致: {label:?} != {score:?}")]
  ShapeMismatch {
    label: (usize, usize),
    score: (usize, usize),
  },
  #[error("多边形数量 {polygons} 与分数数量 {scores} 不一致")]
  CountMismatch { polygons: usize, scores: usize },
}

/// 解码后的推理请求，图像布局为 (height, width, channel)
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub image: Array3<f32>,
  pub settings: Vec<u8>,
}

fn dim_to_i32(value: usize, name: &str) -> Result<i32, WireError> {
  i32::try_from(value).map_err(|_| WireError::InvalidShape(format!("{} = {} 超出 int32", name, value)))
}

fn dim_from_i32(value: i32, name: &str) -> Result<usize, WireError> {
  usize::try_from(value).map_err(|_| WireError::InvalidShape(format!("{} = {} 为负数", name, value)))
}

fn expected_len(dims: &[usize], elem_size: usize) -> Result<usize, WireError> {
  dims
    .iter()
    .try_fold(elem_size, |acc, &d| acc.checked_mul(d))
    .ok_or_else(|| WireError::InvalidShape(format!("尺寸 {:?} 溢出", dims)))
}

pub fn encode_image(image: ArrayView3<f32>) -> Result<Image, WireError> {
  let (height, width, channel) = image.dim();
  let values: Vec<f32> = image.iter().copied().collect();
  let mut data = vec![0u8; values.len() * 4];
  BigEndian::write_f32_into(&values, &mut data);

  Ok(Image {
    height: dim_to_i32(height, "height")?,
    width: dim_to_i32(width, "width")?,
    channel: dim_to_i32(channel, "channel")?,
    data,
  })
}

pub fn decode_image(image: &Image) -> Result<Array3<f32>, WireError> {
  let height = dim_from_i32(image.height, "height")?;
  let width = dim_from_i32(image.width, "width")?;
  let channel = dim_from_i32(image.channel, "channel")?;

  let expected = expected_len(&[height, width, channel], 4)?;
  if image.data.len() != expected {
    return Err(WireError::LengthMismatch {
      expected,
      actual: image.data.len(),
    });
  }

  let mut values = vec![0f32; expected / 4];
  BigEndian::read_f32_into(&image.data, &mut values);
  Array3::from_shape_vec((height, width, channel), values)
    .map_err(|e| WireError::InvalidShape(e.to_string()))
}

/// 组装请求消息体，主要供对端与测试使用
pub fn encode_input(image: ArrayView3<f32>, settings: &[u8]) -> Result<Vec<u8>, WireError> {
  let input = Input {
    image: Some(encode_image(image)?),
    settings: settings.to_vec(),
  };
  Ok(input.encode_to_vec())
}

pub fn decode_input(bytes: &[u8]) -> Result<Request, WireError> {
  let input = Input::decode(bytes)?;
  let image = input.image.as_ref().ok_or(WireError::MissingField("image"))?;
  Ok(Request {
    image: decode_image(image)?,
    settings: input.settings,
  })
}

/// 分数 ×1000 后向零截断为 int16，越界或非有限值直接拒绝
pub fn quantize_score(score: f32) -> Result<i16, WireError> {
  let scaled = (score * SCORE_SCALE).trunc();
  if !scaled.is_finite() || scaled < i16::MIN as f32 || scaled > i16::MAX as f32 {
    return Err(WireError::OutOfRange(score as f64));
  }
  Ok(scaled as i16)
}

pub fn dequantize_score(value: i16) -> f32 {
  value as f32 / SCORE_SCALE
}

fn matrix_to_msg(values: &[i16], height: usize, width: usize) -> Result<IntMatrix, WireError> {
  let mut data = vec![0u8; values.len() * 2];
  BigEndian::write_i16_into(values, &mut data);
  Ok(IntMatrix {
    height: dim_to_i32(height, "height")?,
    width: dim_to_i32(width, "width")?,
    data,
  })
}

pub fn encode_label(label: ArrayView2<i32>) -> Result<IntMatrix, WireError> {
  let (height, width) = label.dim();
  let values = label
    .iter()
    .map(|&v| i16::try_from(v).map_err(|_| WireError::OutOfRange(v as f64)))
    .collect::<Result<Vec<_>, _>>()?;
  matrix_to_msg(&values, height, width)
}

pub fn encode_score(score: ArrayView2<f32>) -> Result<IntMatrix, WireError> {
  let (height, width) = score.dim();
  let values = score
    .iter()
    .map(|&v| quantize_score(v))
    .collect::<Result<Vec<_>, _>>()?;
  matrix_to_msg(&values, height, width)
}

pub fn decode_int_matrix(matrix: &IntMatrix) -> Result<Array2<i16>, WireError> {
  let height = dim_from_i32(matrix.height, "height")?;
  let width = dim_from_i32(matrix.width, "width")?;

  let expected = expected_len(&[height, width], 2)?;
  if matrix.data.len() != expected {
    return Err(WireError::LengthMismatch {
      expected,
      actual: matrix.data.len(),
    });
  }

  let mut values = vec![0i16; expected / 2];
  BigEndian::read_i16_into(&matrix.data, &mut values);
  Array2::from_shape_vec((height, width), values).map_err(|e| WireError::InvalidShape(e.to_string()))
}

pub fn encode_result(label: ArrayView2<i32>, score: ArrayView2<f32>) -> Result<Vec<u8>, WireError> {
  if label.dim() != score.dim() {
    return Err(WireError::ShapeMismatch {
      label: label.dim(),
      score: score.dim(),
    });
  }

  let result = MaskResult {
    label: Some(encode_label(label)?),
    score: Some(encode_score(score)?),
  };
  Ok(result.encode_to_vec())
}

/// 解码标签/分数结果，返回原始 int16 矩阵 (label, score)
pub fn decode_result(bytes: &[u8]) -> Result<(Array2<i16>, Array2<i16>), WireError> {
  let result = MaskResult::decode(bytes)?;
  let label = result.label.as_ref().ok_or(WireError::MissingField("label"))?;
  let score = result.score.as_ref().ok_or(WireError::MissingField("score"))?;
  let label = decode_int_matrix(label)?;
  let score = decode_int_matrix(score)?;
  if label.dim() != score.dim() {
    return Err(WireError::ShapeMismatch {
      label: label.dim(),
      score: score.dim(),
    });
  }
  Ok((label, score))
}

/// 编码多边形结果，少于两个点的多边形被跳过
pub fn encode_polygon_result(polygons: &[Vec<[f32; 2]>], scores: &[f32]) -> Result<Vec<u8>, WireError> {
  if polygons.len() != scores.len() {
    return Err(WireError::CountMismatch {
      polygons: polygons.len(),
      scores: scores.len(),
    });
  }

  let polygons = polygons
    .iter()
    .zip(scores)
    .filter(|(points, _)| points.len() > 1)
    .map(|(points, &score)| Polygon {
      score,
      points: points.iter().map(|&[x, y]| Point { x, y }).collect(),
    })
    .collect();

  Ok(PolygonResult { polygons }.encode_to_vec())
}

pub fn decode_polygon_result(bytes: &[u8]) -> Result<PolygonResult, WireError> {
  Ok(PolygonResult::decode(bytes)?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{Array, array};

  #[test]
  fn image_data_is_big_endian_float() {
    let image = Array3::from_elem((1, 1, 1), 1.0f32);
    let msg = encode_image(image.view()).unwrap();
    assert_eq!(msg.data, vec![0x3f, 0x80, 0x00, 0x00]);
    assert_eq!((msg.height, msg.width, msg.channel), (1, 1, 1));
  }

  #[test]
  fn image_round_trip_keeps_layout() {
    let image = Array::from_shape_fn((3, 2, 2), |(h, w, c)| (h * 100 + w * 10 + c) as f32 - 0.5);
    let decoded = decode_image(&encode_image(image.view()).unwrap()).unwrap();
    assert_eq!(decoded, image);
  }

  #[test]
  fn input_carries_settings_untouched() {
    let image = Array3::from_elem((2, 2, 1), 0.25f32);
    let settings = [0x0d, 0x00, 0x00, 0x80, 0x3f, 0x38, 0x01];
    let bytes = encode_input(image.view(), &settings).unwrap();
    let request = decode_input(&bytes).unwrap();
    assert_eq!(request.image, image);
    assert_eq!(request.settings, settings);
  }

  #[test]
  fn input_with_short_data_is_malformed() {
    let msg = Input {
      image: Some(Image {
        height: 2,
        width: 2,
        channel: 1,
        data: vec![0; 12],
      }),
      settings: vec![],
    };
    let err = decode_input(&msg.encode_to_vec()).unwrap_err();
    assert!(matches!(
      err,
      WireError::LengthMismatch {
        expected: 16,
        actual: 12
      }
    ));
  }

  #[test]
  fn input_without_image_is_malformed() {
    let msg = Input {
      image: None,
      settings: vec![1, 2, 3],
    };
    let err = decode_input(&msg.encode_to_vec()).unwrap_err();
    assert!(matches!(err, WireError::MissingField("image")));
  }

  #[test]
  fn input_with_negative_dimension_is_malformed() {
    let msg = Input {
      image: Some(Image {
        height: -1,
        width: 2,
        channel: 1,
        data: vec![],
      }),
      settings: vec![],
    };
    let err = decode_input(&msg.encode_to_vec()).unwrap_err();
    assert!(matches!(err, WireError::InvalidShape(_)));
  }

  #[test]
  fn garbage_is_malformed() {
    let err = decode_input(&[0xff, 0xff, 0xff]).unwrap_err();
    assert!(matches!(err, WireError::Decode(_)));
  }

  #[test]
  fn score_is_truncated_toward_zero() {
    assert_eq!(quantize_score(0.75).unwrap(), 750);
    assert_eq!(quantize_score(0.0009).unwrap(), 0);
    assert_eq!(quantize_score(-0.0009).unwrap(), 0);
    assert_eq!(quantize_score(-1.5).unwrap(), -1500);
    assert_eq!(quantize_score(32.7675).unwrap(), 32767);
  }

  #[test]
  fn score_overflow_is_rejected() {
    assert!(matches!(quantize_score(32.8), Err(WireError::OutOfRange(_))));
    assert!(matches!(quantize_score(-32.8), Err(WireError::OutOfRange(_))));
    assert!(quantize_score(f32::NAN).is_err());
    assert!(quantize_score(f32::INFINITY).is_err());
  }

  #[test]
  fn label_outside_int16_is_rejected() {
    let label = array![[0, 40000]];
    let score = array![[0.0f32, 0.5]];
    let err = encode_result(label.view(), score.view()).unwrap_err();
    assert!(matches!(err, WireError::OutOfRange(v) if v == 40000.0));
  }

  #[test]
  fn result_layout_is_big_endian_int16() {
    let label = array![[0, 1], [2, 258]];
    let score = array![[0.0f32, 0.5], [0.25, 1.0]];
    let bytes = encode_result(label.view(), score.view()).unwrap();
    let msg = MaskResult::decode(bytes.as_slice()).unwrap();
    let label_msg = msg.label.unwrap();
    assert_eq!(label_msg.data, vec![0, 0, 0, 1, 0, 2, 1, 2]);
    assert_eq!((label_msg.height, label_msg.width), (2, 2));

    let (label, score) = decode_result(&bytes).unwrap();
    assert_eq!(label, array![[0i16, 1], [2, 258]]);
    assert_eq!(score, array![[0i16, 500], [250, 1000]]);
  }

  #[test]
  fn result_requires_matching_shapes() {
    let label = Array2::<i32>::zeros((2, 3));
    let score = Array2::<f32>::zeros((3, 2));
    let err = encode_result(label.view(), score.view()).unwrap_err();
    assert!(matches!(err, WireError::ShapeMismatch { .. }));
  }

  #[test]
  fn empty_result_encodes() {
    let bytes = encode_result(Array2::<i32>::zeros((0, 0)).view(), Array2::<f32>::zeros((0, 0)).view()).unwrap();
    let (label, score) = decode_result(&bytes).unwrap();
    assert_eq!(label.dim(), (0, 0));
    assert_eq!(score.dim(), (0, 0));
  }

  #[test]
  fn degenerate_polygons_are_skipped() {
    let polygons = vec![
      vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]],
      vec![[5.0, 5.0]],
      vec![],
      vec![[2.0, 2.0], [3.0, 3.0]],
    ];
    let scores = [0.9, 0.8, 0.7, 0.6];
    let bytes = encode_polygon_result(&polygons, &scores).unwrap();
    let result = decode_polygon_result(&bytes).unwrap();

    assert_eq!(result.polygons.len(), 2);
    assert_eq!(result.polygons[0].score, 0.9);
    assert_eq!(result.polygons[0].points.len(), 3);
    assert_eq!(result.polygons[0].points[2], Point { x: 1.0, y: 1.0 });
    assert_eq!(result.polygons[1].score, 0.6);
    assert_eq!(result.polygons[1].points[0], Point { x: 2.0, y: 2.0 });
  }

  #[test]
  fn polygon_count_must_match_scores() {
    let err = encode_polygon_result(&[vec![[0.0, 0.0], [1.0, 1.0]]], &[]).unwrap_err();
    assert!(matches!(err, WireError::CountMismatch { polygons: 1, scores: 0 }));
  }
}
