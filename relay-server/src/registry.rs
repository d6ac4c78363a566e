//! 连接注册表
//!
//! 以对端地址为键记录每个连接的登录名、状态和输出句柄。断开的条目默认保留，
//! 重复清理是幂等的，广播遍历时也不会遇到悬空键；`compact` 可以随后回收它们。

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use protocol::{FrameWriter, ProtocolError, Result};
use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// 连接标识
pub type ConnectionId = SocketAddr;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

struct OutputState<W> {
    writer: FrameWriter<W>,
    closed: bool,
}

/// 连接的输出句柄
///
/// 连接自身的处理器和其他连接的广播都会写同一个输出，每个连接各自持有一把锁，
/// 保证同一时刻只有一个写者，不同连接之间的写入互不阻塞。
pub struct OutputHandle<W = OwnedWriteHalf> {
    inner: Arc<Mutex<OutputState<W>>>,
}

impl<W> Clone for OutputHandle<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> OutputHandle<W> {
    pub fn new(writer: FrameWriter<W>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OutputState {
                writer,
                closed: false,
            })),
        }
    }

    /// 写入一整帧，关闭后的写入返回 [`ProtocolError::ConnectionClosed`]
    pub async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut state = self.inner.lock().await;
        if state.closed {
            return Err(ProtocolError::ConnectionClosed);
        }
        state.writer.write_frame(frame).await
    }

    /// 关闭输出，只有第一次调用真正执行关闭并返回 true
    pub async fn close(&self) -> bool {
        let mut state = self.inner.lock().await;
        if state.closed {
            return false;
        }
        state.closed = true;
        if let Err(e) = state.writer.shutdown().await {
            debug!(error = %e, "shutdown on already broken output");
        }
        true
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

/// 注册表条目
pub struct ConnectionEntry<W = OwnedWriteHalf> {
    /// 收到 Join 之前为空，不要求唯一
    pub login: String,
    pub status: ConnectionStatus,
    pub output: OutputHandle<W>,
}

impl<W> Clone for ConnectionEntry<W> {
    fn clone(&self) -> Self {
        Self {
            login: self.login.clone(),
            status: self.status,
            output: self.output.clone(),
        }
    }
}

/// 连接注册表
///
/// 所有修改都在内部写锁下完成，锁内不做任何 IO。
/// tokio 的 `RwLock` 按 FIFO 排队，频繁的快照不会饿死注册。
pub struct Registry<W = OwnedWriteHalf> {
    entries: RwLock<HashMap<ConnectionId, ConnectionEntry<W>>>,
}

impl<W: AsyncWrite + Unpin + Send> Registry<W> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 登记新连接：状态为 Connected，登录名为空
    pub async fn register(&self, id: ConnectionId, output: OutputHandle<W>) -> ConnectionEntry<W> {
        let entry = ConnectionEntry {
            login: String::new(),
            status: ConnectionStatus::Connected,
            output,
        };
        let mut entries = self.entries.write().await;
        if entries.insert(id, entry.clone()).is_some() {
            debug!(peer = %id, "replaced stale registry entry");
        }
        entry
    }

    /// 收到 Join 后记录登录名，重复调用无副作用；未知标识返回 false
    pub async fn mark_login(&self, id: ConnectionId, login: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&id) {
            Some(entry) => {
                if entry.login != login {
                    entry.login = login.to_string();
                }
                true
            }
            None => false,
        }
    }

    /// 标记断开
    ///
    /// 幂等：只有真正从 Connected 变为 Disconnected 的那次调用返回 true，
    /// 多个失败路径并发调用也安全。
    pub async fn mark_disconnected(&self, id: ConnectionId) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&id) {
            Some(entry) if entry.status == ConnectionStatus::Connected => {
                entry.status = ConnectionStatus::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// 某一时刻的一致视图，供广播在锁外遍历
    pub async fn snapshot(&self) -> Vec<(ConnectionId, ConnectionEntry<W>)> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect()
    }

    pub async fn status(&self, id: ConnectionId) -> Option<ConnectionStatus> {
        self.entries.read().await.get(&id).map(|entry| entry.status)
    }

    pub async fn login(&self, id: ConnectionId) -> Option<String> {
        self.entries
            .read()
            .await
            .get(&id)
            .map(|entry| entry.login.clone())
    }

    /// 当前处于 Connected 状态的连接数
    pub async fn connected_count(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.status == ConnectionStatus::Connected)
            .count()
    }

    /// 移除所有已断开的条目，返回移除数量
    pub async fn compact(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.status == ConnectionStatus::Connected);
        before - entries.len()
    }

    /// 关闭全部连接（服务器关闭时使用）
    pub async fn close_all(&self) {
        for (id, entry) in self.snapshot().await {
            self.mark_disconnected(id).await;
            entry.output.close().await;
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> Default for Registry<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn addr(port: u16) -> ConnectionId {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn output() -> (OutputHandle<DuplexStream>, DuplexStream) {
        let (local, remote) = tokio::io::duplex(1024);
        (OutputHandle::new(FrameWriter::new(local)), remote)
    }

    #[tokio::test]
    async fn test_register_starts_connected_without_login() {
        let registry = Registry::new();
        let (handle, _remote) = output();
        let entry = registry.register(addr(1), handle).await;

        assert_eq!(entry.status, ConnectionStatus::Connected);
        assert!(entry.login.is_empty());
        assert_eq!(registry.connected_count().await, 1);
    }

    #[tokio::test]
    async fn test_mark_login_is_idempotent() {
        let registry = Registry::new();
        let (handle, _remote) = output();
        registry.register(addr(1), handle).await;

        assert!(registry.mark_login(addr(1), "alice").await);
        assert!(registry.mark_login(addr(1), "alice").await);
        assert_eq!(registry.login(addr(1)).await.as_deref(), Some("alice"));
        assert!(!registry.mark_login(addr(2), "bob").await);
    }

    #[tokio::test]
    async fn test_mark_disconnected_is_idempotent() {
        let registry = Registry::new();
        let (handle, _remote) = output();
        registry.register(addr(1), handle).await;

        assert!(registry.mark_disconnected(addr(1)).await);
        assert!(!registry.mark_disconnected(addr(1)).await);
        assert_eq!(
            registry.status(addr(1)).await,
            Some(ConnectionStatus::Disconnected)
        );
        // 未知标识也不报错
        assert!(!registry.mark_disconnected(addr(9)).await);
    }

    #[tokio::test]
    async fn test_concurrent_mark_disconnected_transitions_once() {
        let registry = Arc::new(Registry::new());
        let (handle, _remote) = output();
        registry.register(addr(1), handle).await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.mark_disconnected(addr(1)).await })
            })
            .collect();

        let mut transitions = 0;
        for task in tasks {
            if task.await.unwrap() {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);
    }

    #[tokio::test]
    async fn test_snapshot_keeps_disconnected_entries() {
        let registry = Registry::new();
        let (a, _ra) = output();
        let (b, _rb) = output();
        registry.register(addr(1), a).await;
        registry.register(addr(2), b).await;
        registry.mark_disconnected(addr(1)).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.connected_count().await, 1);
    }

    #[tokio::test]
    async fn test_compact_removes_only_disconnected() {
        let registry = Registry::new();
        let (a, _ra) = output();
        let (b, _rb) = output();
        registry.register(addr(1), a).await;
        registry.register(addr(2), b).await;
        registry.mark_disconnected(addr(1)).await;

        assert_eq!(registry.compact().await, 1);
        assert_eq!(registry.status(addr(1)).await, None);
        assert_eq!(
            registry.status(addr(2)).await,
            Some(ConnectionStatus::Connected)
        );
    }

    #[tokio::test]
    async fn test_output_close_runs_once() {
        let (handle, _remote) = output();
        assert!(handle.close().await);
        assert!(!handle.close().await);
        assert!(handle.is_closed().await);
        assert!(matches!(
            handle.write_frame(b"x").await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_all_disconnects_everyone() {
        let registry = Registry::new();
        let (a, _ra) = output();
        let (b, _rb) = output();
        registry.register(addr(1), a.clone()).await;
        registry.register(addr(2), b.clone()).await;

        registry.close_all().await;

        assert_eq!(registry.connected_count().await, 0);
        assert!(a.is_closed().await);
        assert!(b.is_closed().await);
    }
}
