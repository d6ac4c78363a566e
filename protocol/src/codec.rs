//! 帧编解码
//!
//! 帧格式:
//! ```text
//! ┌────────────────┬────────────────────────────────┐
//! │  Length (4B)   │         Payload (JSON)         │
//! │    u32 BE      │         Event object           │
//! └────────────────┴────────────────────────────────┘
//! ```
//!
//! 一次传输层读取可能包含零个、一个或半个事件，因此每个连接都带一个
//! [`FrameDecoder`] 累积字节，直到凑齐完整的一帧。

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::message::Event;
use crate::{MAX_FRAME_SIZE, READ_CHUNK_SIZE};

/// 长度前缀大小: 4 字节大端序
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// 将事件编码为 JSON 负载（不含帧头）
pub fn encode_event(event: &Event) -> Result<Vec<u8>> {
    serde_json::to_vec(event).map_err(ProtocolError::Encode)
}

/// 从 JSON 负载解码事件并校验
///
/// 失败只影响这一条消息，调用方应丢弃后继续读取。
pub fn decode_event(payload: &[u8]) -> Result<Event> {
    let event: Event = serde_json::from_slice(payload).map_err(ProtocolError::Decode)?;
    event.validate()?;
    Ok(event)
}

/// 编码事件并加上长度前缀，得到可直接写入传输层的完整帧
pub fn encode_frame(event: &Event) -> Result<Vec<u8>> {
    let payload = encode_event(event)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// 增量帧解码器
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加刚读到的字节
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// 取出下一帧的负载
    ///
    /// 数据不足一帧时返回 `Ok(None)`，已缓冲的字节保留到下次调用。
    /// 声明长度超限时返回错误，此后字节流无法再同步。
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        let end = LENGTH_PREFIX_SIZE + length;
        if self.buffer.len() < end {
            return Ok(None);
        }

        let payload = self.buffer[LENGTH_PREFIX_SIZE..end].to_vec();
        self.buffer.drain(..end);
        Ok(Some(payload))
    }

    /// 已缓冲但尚未组成完整帧的字节数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// 帧读取器
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// 创建新的帧读取器
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            chunk: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    /// 读取一帧负载
    ///
    /// 取消安全：读到的字节在下一个 await 之前就已进入解码缓冲区，
    /// 可以放在 `tokio::select!` 中使用。
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(payload) = self.decoder.next_frame()? {
                return Ok(payload);
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                if self.decoder.buffered() > 0 {
                    debug!(
                        buffered = self.decoder.buffered(),
                        "peer closed in the middle of a frame"
                    );
                }
                return Err(ProtocolError::ConnectionClosed);
            }
            self.decoder.extend(&self.chunk[..n]);
        }
    }

    /// 接收并解码一个事件
    ///
    /// 解码失败时该帧已被消费，返回的错误 [`ProtocolError::is_recoverable`] 为真。
    pub async fn recv(&mut self) -> Result<Event> {
        let payload = self.read_frame().await?;
        decode_event(&payload)
    }
}

/// 帧写入器
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// 创建新的帧写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 写入一帧已编码好的数据（长度前缀 + 负载）
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// 编码并发送一个事件
    pub async fn send(&mut self, event: &Event) -> Result<()> {
        let frame = encode_frame(event)?;
        self.write_frame(&frame).await
    }

    /// 关闭写方向
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
