// 该文件是 SegServe 项目的一部分。
// src/transport.rs - 长度前缀分帧传输
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

//! 帧格式: `[4 字节大端有符号长度][消息体]`，两个方向对称。
//!
//! 传输层不理解消息内容，只搬运不透明的字节块。

use std::io::{BufWriter, ErrorKind, Read, Write};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use thiserror::Error;
use tracing::{debug, warn};

pub const FRAME_HEADER_LEN: usize = 4;
pub const DEFAULT_MAX_FRAME_LEN: usize = 1 << 30;

#[derive(Error, Debug)]
pub enum TransportError {
  #[error("帧被截断: 期望 {expected} 字节, 实际读取 {received} 字节")]
  Truncated { expected: usize, received: usize },
  #[error("帧长度非法: {0}")]
  InvalidLength(i64),
  #[error("帧过大: {len} 字节, 上限 {limit} 字节")]
  FrameTooLarge { len: usize, limit: usize },
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 尽量读满 `buf`，返回实际读取的字节数；只有流结束才会少于 `buf.len()`
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
  let mut off = 0;
  while off < buf.len() {
    match reader.read(&mut buf[off..]) {
      Ok(0) => break,
      Ok(n) => off += n,
      Err(e) if e.kind() == ErrorKind::Interrupted => continue,
      Err(e) => return Err(e),
    }
  }
  Ok(off)
}

/// 读取一帧，流已关闭时返回 `None`
pub fn read_frame<R: Read>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, TransportError> {
  let mut header = [0u8; FRAME_HEADER_LEN];
  let received = read_full(reader, &mut header)?;
  if received < FRAME_HEADER_LEN {
    if received > 0 {
      warn!("输入流在帧头中途关闭, 丢弃 {} 字节", received);
    }
    return Ok(None);
  }

  let len = BigEndian::read_i32(&header);
  let len = usize::try_from(len).map_err(|_| TransportError::InvalidLength(len as i64))?;
  if len > max_len {
    return Err(TransportError::FrameTooLarge { len, limit: max_len });
  }

  let mut body = vec![0u8; len];
  let received = read_full(reader, &mut body)?;
  if received < len {
    return Err(TransportError::Truncated {
      expected: len,
      received,
    });
  }

  debug!("读取帧: {} 字节", len);
  Ok(Some(body))
}

/// 写入一帧，长度前缀与消息体合并为一次写入
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<(), TransportError> {
  let len = i32::try_from(body.len()).map_err(|_| TransportError::FrameTooLarge {
    len: body.len(),
    limit: i32::MAX as usize,
  })?;

  let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
  buf.write_i32::<BigEndian>(len)?;
  buf.extend_from_slice(body);

  writer.write_all(&buf)?;
  writer.flush()?;
  debug!("写出帧: {} 字节", body.len());
  Ok(())
}

/// 帧读取器，作为迭代器时按顺序产出帧，流关闭后结束
pub struct FrameReader<R> {
  inner: R,
  max_frame_len: usize,
  closed: bool,
}

impl<R: Read> FrameReader<R> {
  pub fn new(inner: R) -> Self {
    Self {
      inner,
      max_frame_len: DEFAULT_MAX_FRAME_LEN,
      closed: false,
    }
  }

  pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
    self.max_frame_len = max_frame_len;
    self
  }

  pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
    read_frame(&mut self.inner, self.max_frame_len)
  }
}

impl<R: Read> Iterator for FrameReader<R> {
  type Item = Result<Vec<u8>, TransportError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.closed {
      return None;
    }
    match self.read_frame() {
      Ok(Some(frame)) => Some(Ok(frame)),
      Ok(None) => {
        self.closed = true;
        None
      }
      Err(e) => {
        self.closed = true;
        Some(Err(e))
      }
    }
  }
}

pub struct FrameWriter<W> {
  inner: W,
}

impl<W: Write> FrameWriter<W> {
  pub fn new(inner: W) -> Self {
    Self { inner }
  }

  pub fn write_frame(&mut self, body: &[u8]) -> Result<(), TransportError> {
    write_frame(&mut self.inner, body)
  }
}

impl<W: Write> FrameWriter<BufWriter<W>> {
  /// 经 `BufWriter` 写出，每帧在 flush 时整体交给下层写端
  ///
  /// 行缓冲的标准输出遇到 0x0A 就会提前写出，帧会被拆成多段。
  pub fn buffered(inner: W) -> Self {
    Self::new(BufWriter::new(inner))
  }
}
