// 该文件是 SegServe 项目的一部分。
// src/wire/message.rs - 协议消息定义
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

//! 与对端约定的 protobuf 消息体。
//!
//! 张量数据一律以大端字节序存放在 `data` 字段中：
//! 图像为 float32，标签与分数矩阵为 int16。

/// 输入图像，`data` 为 `height * width * channel` 个大端 float32
#[derive(Clone, PartialEq, prost::Message)]
pub struct Image {
  #[prost(int32, tag = "1")]
  pub height: i32,
  #[prost(int32, tag = "2")]
  pub width: i32,
  #[prost(int32, tag = "3")]
  pub channel: i32,
  #[prost(bytes = "vec", tag = "4")]
  pub data: Vec<u8>,
}

/// 推理请求
///
/// `settings` 以原始字节透传，与对端的嵌套设置消息在线路上等价。
#[derive(Clone, PartialEq, prost::Message)]
pub struct Input {
  #[prost(message, optional, tag = "1")]
  pub image: Option<Image>,
  #[prost(bytes = "vec", tag = "2")]
  pub settings: Vec<u8>,
}

/// 二维 int16 矩阵，`data` 为 `height * width` 个大端 int16
#[derive(Clone, PartialEq, prost::Message)]
pub struct IntMatrix {
  #[prost(int32, tag = "1")]
  pub height: i32,
  #[prost(int32, tag = "2")]
  pub width: i32,
  #[prost(bytes = "vec", tag = "3")]
  pub data: Vec<u8>,
}

/// 标签/分数结果
#[derive(Clone, PartialEq, prost::Message)]
pub struct MaskResult {
  #[prost(message, optional, tag = "1")]
  pub label: Option<IntMatrix>,
  #[prost(message, optional, tag = "2")]
  pub score: Option<IntMatrix>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Point {
  #[prost(float, tag = "1")]
  pub x: f32,
  #[prost(float, tag = "2")]
  pub y: f32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Polygon {
  #[prost(float, tag = "1")]
  pub score: f32,
  #[prost(message, repeated, tag = "2")]
  pub points: Vec<Point>,
}

/// 多边形结果
#[derive(Clone, PartialEq, prost::Message)]
pub struct PolygonResult {
  #[prost(message, repeated, tag = "1")]
  pub polygons: Vec<Polygon>,
}
