//! 广播引擎
//!
//! 把一帧已编码的事件扇出给除发送方之外的所有在线连接。
//! 尽力投递：单个接收方失败只会让它被标记为断开，不影响同一批次的其他接收方，
//! 不重试，也不保证接收方之间的顺序。

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use protocol::{ProtocolError, BROADCAST_WRITE_TIMEOUT};
use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::time::timeout;
use tracing::warn;

use crate::registry::{ConnectionId, ConnectionStatus, Registry};

/// 一次广播的投递结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// 广播引擎
pub struct Broadcaster<W = OwnedWriteHalf> {
    registry: Arc<Registry<W>>,
    write_timeout: Duration,
}

impl<W> Clone for Broadcaster<W> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            write_timeout: self.write_timeout,
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> Broadcaster<W> {
    pub fn new(registry: Arc<Registry<W>>) -> Self {
        Self::with_write_timeout(registry, BROADCAST_WRITE_TIMEOUT)
    }

    /// 指定单个接收方的写入超时
    pub fn with_write_timeout(registry: Arc<Registry<W>>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    /// 广播一帧数据
    ///
    /// 按连接标识排除发送方（同名的两个会话是不同的接收方）。
    /// 所有接收方的写入并发进行，每个都有超时，写失败或超时的接收方
    /// 会被标记为断开并关闭输出。
    pub async fn broadcast(&self, frame: &[u8], sender: ConnectionId) -> BroadcastReport {
        let recipients = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|(id, entry)| *id != sender && entry.status == ConnectionStatus::Connected);

        let deliveries = recipients.map(|(id, entry)| async move {
            let result = match timeout(self.write_timeout, entry.output.write_frame(frame)).await {
                Ok(result) => result,
                Err(_) => Err(ProtocolError::ConnectionTimeout),
            };
            (id, entry, result)
        });

        let mut report = BroadcastReport::default();
        for (id, entry, result) in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(peer = %id, login = %entry.login, error = %e, "broadcast write failed");
                    self.registry.mark_disconnected(id).await;
                    // 超时可能留下半帧，这个输出已经不可再用
                    entry.output.close().await;
                    report.failed += 1;
                }
            }
        }
        report
    }
}
