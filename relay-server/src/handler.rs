//! 连接处理器
//!
//! 每个已接受的连接一个任务：
//! `Accepted → Connected → Disconnected(Eof | Leave | ReadError | Shutdown)`。
//! 无论从哪条路径退出，注册表条目都会被标记为断开，输出句柄只关闭一次。

use std::sync::Arc;

use protocol::{encode_frame, Event, FrameReader, FrameWriter, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::registry::{ConnectionId, OutputHandle, Registry};

/// 连接结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// 对端关闭
    Eof,
    /// 收到 Leave 事件
    Leave,
    /// 读取出错或帧无法同步
    ReadError,
    /// 服务器关闭
    Shutdown,
}

/// 单个连接的处理器
pub struct ConnectionHandler<W = OwnedWriteHalf> {
    id: ConnectionId,
    registry: Arc<Registry<W>>,
    broadcaster: Broadcaster<W>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<W: AsyncWrite + Unpin + Send> ConnectionHandler<W> {
    pub fn new(
        id: ConnectionId,
        registry: Arc<Registry<W>>,
        broadcaster: Broadcaster<W>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            registry,
            broadcaster,
            shutdown_rx,
        }
    }

    /// 登记连接并运行读循环，直到连接结束
    pub async fn run<R: AsyncRead + Unpin>(
        mut self,
        mut reader: FrameReader<R>,
        writer: FrameWriter<W>,
    ) -> DisconnectReason {
        let output = OutputHandle::new(writer);
        self.registry.register(self.id, output.clone()).await;
        info!(peer = %self.id, "connected");

        let reason = self.read_loop(&mut reader).await;

        // 清理：每条退出路径都会走到这里
        self.registry.mark_disconnected(self.id).await;
        output.close().await;
        info!(peer = %self.id, ?reason, "disconnected");

        reason
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut FrameReader<R>,
    ) -> DisconnectReason {
        if *self.shutdown_rx.borrow() {
            return DisconnectReason::Shutdown;
        }

        loop {
            let result = tokio::select! {
                result = reader.recv() => result,
                _ = self.shutdown_rx.changed() => return DisconnectReason::Shutdown,
            };

            match result {
                Ok(event) => {
                    if !self.handle_event(event).await {
                        return DisconnectReason::Leave;
                    }
                }
                Err(ProtocolError::ConnectionClosed) => return DisconnectReason::Eof,
                Err(e) if e.is_recoverable() => {
                    warn!(peer = %self.id, error = %e, "dropping malformed event");
                }
                Err(e) => {
                    warn!(peer = %self.id, error = %e, "error receiving from peer");
                    return DisconnectReason::ReadError;
                }
            }
        }
    }

    /// 处理一个事件，返回 false 表示连接应当结束
    async fn handle_event(&self, event: Event) -> bool {
        debug!(peer = %self.id, event = event.kind(), login = event.login(), "received");

        if let Event::Join { login } = &event {
            self.registry.mark_login(self.id, login).await;
            info!(peer = %self.id, %login, "joined");
        }

        match encode_frame(&event) {
            Ok(frame) => {
                let report = self.broadcaster.broadcast(&frame, self.id).await;
                debug!(
                    peer = %self.id,
                    delivered = report.delivered,
                    failed = report.failed,
                    "broadcasted"
                );
            }
            Err(e) => warn!(peer = %self.id, error = %e, "failed to re-encode event"),
        }

        !matches!(event, Event::Leave { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionStatus;
    use std::net::SocketAddr;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    fn addr(port: u16) -> ConnectionId {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// 远端（模拟客户端）持有的一对读写端
    struct Peer {
        reader: FrameReader<DuplexStream>,
        writer: FrameWriter<DuplexStream>,
        task: JoinHandle<DisconnectReason>,
    }

    fn spawn_peer(
        registry: &Arc<Registry<DuplexStream>>,
        port: u16,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Peer {
        let (client_in, server_out) = tokio::io::duplex(4096);
        let (server_in, client_out) = tokio::io::duplex(4096);
        let handler = ConnectionHandler::new(
            addr(port),
            Arc::clone(registry),
            Broadcaster::new(Arc::clone(registry)),
            shutdown_rx,
        );
        let task = tokio::spawn(handler.run(FrameReader::new(server_in), FrameWriter::new(server_out)));
        Peer {
            reader: FrameReader::new(client_in),
            writer: FrameWriter::new(client_out),
            task,
        }
    }

    async fn wait_connected(registry: &Registry<DuplexStream>, count: usize) {
        while registry.connected_count().await < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_join_records_login_and_fans_out() {
        let registry = Arc::new(Registry::new());
        let (_tx, rx) = watch::channel(false);
        let mut a = spawn_peer(&registry, 1, rx.clone());
        let mut b = spawn_peer(&registry, 2, rx.clone());
        wait_connected(&registry, 2).await;

        a.writer.send(&Event::join("alice")).await.unwrap();
        assert_eq!(b.reader.recv().await.unwrap(), Event::join("alice"));
        assert_eq!(registry.login(addr(1)).await.as_deref(), Some("alice"));

        a.writer.send(&Event::leave("alice")).await.unwrap();
        assert_eq!(b.reader.recv().await.unwrap(), Event::leave("alice"));
        assert_eq!(a.task.await.unwrap(), DisconnectReason::Leave);
        assert_eq!(
            registry.status(addr(1)).await,
            Some(ConnectionStatus::Disconnected)
        );

        // 处理器关闭输出后，A 读到 EOF
        assert!(matches!(
            a.reader.recv().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_eof_marks_disconnected() {
        let registry = Arc::new(Registry::new());
        let (_tx, rx) = watch::channel(false);
        let mut a = spawn_peer(&registry, 1, rx);
        wait_connected(&registry, 1).await;

        a.writer.shutdown().await.unwrap();
        assert_eq!(a.task.await.unwrap(), DisconnectReason::Eof);
        assert_eq!(registry.connected_count().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let registry: Arc<Registry<DuplexStream>> = Arc::new(Registry::new());
        let (_tx, rx) = watch::channel(false);
        let (client_in, server_out) = tokio::io::duplex(4096);
        let (server_in, mut client_out) = tokio::io::duplex(4096);
        let handler = ConnectionHandler::new(
            addr(1),
            Arc::clone(&registry),
            Broadcaster::new(Arc::clone(&registry)),
            rx.clone(),
        );
        let task = tokio::spawn(handler.run(FrameReader::new(server_in), FrameWriter::new(server_out)));
        let mut b = spawn_peer(&registry, 2, rx);
        wait_connected(&registry, 2).await;

        let garbage = b"{oops";
        client_out
            .write_all(&(garbage.len() as u32).to_be_bytes())
            .await
            .unwrap();
        client_out.write_all(garbage).await.unwrap();
        client_out
            .write_all(&encode_frame(&Event::message("alice", "after")).unwrap())
            .await
            .unwrap();

        assert_eq!(
            b.reader.recv().await.unwrap(),
            Event::message("alice", "after")
        );
        assert_eq!(
            registry.status(addr(1)).await,
            Some(ConnectionStatus::Connected)
        );

        drop(client_out);
        drop(client_in);
        assert_eq!(task.await.unwrap(), DisconnectReason::Eof);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_fatal() {
        let registry: Arc<Registry<DuplexStream>> = Arc::new(Registry::new());
        let (_tx, rx) = watch::channel(false);
        let (_client_in, server_out) = tokio::io::duplex(4096);
        let (server_in, mut client_out) = tokio::io::duplex(4096);
        let handler = ConnectionHandler::new(
            addr(1),
            Arc::clone(&registry),
            Broadcaster::new(Arc::clone(&registry)),
            rx,
        );
        let task = tokio::spawn(handler.run(FrameReader::new(server_in), FrameWriter::new(server_out)));

        client_out.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        assert_eq!(task.await.unwrap(), DisconnectReason::ReadError);
        assert_eq!(
            registry.status(addr(1)).await,
            Some(ConnectionStatus::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal_ends_handler() {
        let registry = Arc::new(Registry::new());
        let (tx, rx) = watch::channel(false);
        let a = spawn_peer(&registry, 1, rx);
        wait_connected(&registry, 1).await;

        tx.send(true).unwrap();
        assert_eq!(a.task.await.unwrap(), DisconnectReason::Shutdown);
        assert_eq!(registry.connected_count().await, 0);
    }
}
