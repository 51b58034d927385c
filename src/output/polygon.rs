// 该文件是 SegServe 项目的一部分。
// src/output/polygon.rs - 实例轮廓提取
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
use imageproc::contours::{BorderType, find_contours};
use ndarray::Array2;
use tracing::debug;

/// 实例外接框 [y_min, x_min, y_max, x_max]，闭区间
type Bounds = [usize; 4];

fn instance_bounds(label: &Array2<i32>, count: usize) -> Vec<Option<Bounds>> {
  let mut bounds: Vec<Option<Bounds>> = vec![None; count];
  for ((y, x), &id) in label.indexed_iter() {
    if id <= 0 || id as usize > count {
      continue;
    }
    let b = &mut bounds[id as usize - 1];
    *b = Some(match *b {
      None => [y, x, y, x],
      Some([y0, x0, y1, x1]) => [y0.min(y), x0.min(x), y1.max(y), x1.max(x)],
    });
  }
  bounds
}

/// 提取每个实例（编号 `1..=count`）的外轮廓，按编号排列
///
/// 坐标为 (x, y) 像素坐标。单像素实例至多一个点，编码时会被跳过。
pub fn trace_outlines(label: &Array2<i32>, count: usize) -> Vec<Vec<[f32; 2]>> {
  instance_bounds(label, count)
    .into_iter()
    .enumerate()
    .map(|(idx, bounds)| {
      let Some([y0, x0, y1, x1]) = bounds else {
        return Vec::new();
      };
      let id = idx as i32 + 1;

      // 四周留一像素空白
      let mut mask = GrayImage::new((x1 - x0 + 3) as u32, (y1 - y0 + 3) as u32);
      for y in y0..=y1 {
        for x in x0..=x1 {
          if label[[y, x]] == id {
            mask.put_pixel((x - x0 + 1) as u32, (y - y0 + 1) as u32, Luma([255]));
          }
        }
      }

      let outline: Vec<[f32; 2]> = find_contours::<i32>(&mask)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .max_by_key(|c| c.points.len())
        .map(|c| {
          c.points
            .iter()
            .map(|p| [(p.x - 1 + x0 as i32) as f32, (p.y - 1 + y0 as i32) as f32])
            .collect()
        })
        .unwrap_or_default();

      debug!("实例 {}: 轮廓 {} 个点", id, outline.len());
      outline
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn square_outline_is_in_image_coordinates() {
    let label = array![
      [0, 0, 0, 0, 0],
      [0, 0, 0, 0, 0],
      [0, 0, 1, 1, 1],
      [0, 0, 1, 1, 1],
      [0, 0, 1, 1, 1],
    ];
    let outlines = trace_outlines(&label, 1);
    assert_eq!(outlines.len(), 1);

    let outline = &outlines[0];
    assert!(outline.len() > 1);
    assert!(outline.contains(&[2.0, 2.0]));
    assert!(outline.contains(&[4.0, 4.0]));
    // 内部像素不在轮廓上
    assert!(!outline.contains(&[3.0, 3.0]));
    for &[x, y] in outline {
      assert!((2.0..=4.0).contains(&x) && (2.0..=4.0).contains(&y));
    }
  }

  #[test]
  fn outlines_follow_instance_ids() {
    let label = array![[1, 1, 0, 0], [1, 1, 0, 3], [0, 0, 0, 3]];
    let outlines = trace_outlines(&label, 3);
    assert_eq!(outlines.len(), 3);
    assert!(outlines[0].contains(&[0.0, 0.0]));
    // 编号 2 不存在
    assert!(outlines[1].is_empty());
    assert!(outlines[2].iter().all(|&[x, _]| x == 3.0));
    assert!(outlines[2].len() > 1);
  }

  #[test]
  fn single_pixel_is_degenerate() {
    let label = array![[0, 0], [0, 1]];
    let outlines = trace_outlines(&label, 1);
    assert!(outlines[0].len() <= 1);
    assert!(outlines[0].iter().all(|&p| p == [1.0, 1.0]));
  }
}
