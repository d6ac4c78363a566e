//! 连接封装
//!
//! 把传输层和帧编解码绑在一起，对外只暴露事件级别的收发接口。

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::Result;
use crate::message::Event;
use crate::transport::Transport;

/// 连接封装
///
/// # Type Parameters
/// * `R` - 读取端类型
/// * `W` - 写入端类型
pub struct Connection<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    /// 从传输层创建连接
    pub fn new<T: Transport<Reader = R, Writer = W>>(transport: T) -> Self {
        let (reader, writer) = transport.split();
        Self::from_parts(reader, writer)
    }

    /// 从读写端直接创建连接
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// 分离为读取端和写入端
    ///
    /// 读写由不同任务负责时使用
    pub fn split(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }

    /// 接收事件
    pub async fn recv(&mut self) -> Result<Event> {
        self.reader.recv().await
    }

    /// 发送事件
    pub async fn send(&mut self, event: &Event) -> Result<()> {
        self.writer.send(event).await
    }
}
