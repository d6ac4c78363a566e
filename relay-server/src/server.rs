//! 中继服务器：接受连接并为每个连接启动一个处理器任务

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use protocol::{Connection, TcpListener, TcpTransport, TransportListener};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::handler::{ConnectionHandler, DisconnectReason};
use crate::registry::Registry;

/// 关闭时等待处理器退出的最长时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 中继服务器
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    /// 关闭信号发送端
    shutdown_tx: watch::Sender<bool>,
    /// 关闭信号接收端（克隆给每个处理器）
    shutdown_rx: watch::Receiver<bool>,
    handlers: JoinSet<DisconnectReason>,
}

impl RelayServer {
    /// 绑定监听地址，失败时记录日志并返回错误
    pub async fn bind(addr: &str) -> anyhow::Result<Self> {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(%addr, error = %e, "error while attempting to bind");
                return Err(e).with_context(|| format!("failed to bind {addr}"));
            }
        };

        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            listener,
            registry,
            broadcaster,
            shutdown_tx,
            shutdown_rx,
            handlers: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 共享的连接注册表
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// 运行直到 `shutdown` 完成，然后关闭所有连接
    pub async fn run_until<F>(mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!("Serving on {}", self.listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received shutdown signal, closing connections...");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((transport, peer)) => self.spawn_handler(transport, peer).await,
                        Err(e) => error!(error = %e, "failed to accept connection"),
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// 运行直到收到 Ctrl+C
    pub async fn run_until_ctrl_c(self) -> anyhow::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    async fn spawn_handler(&mut self, transport: TcpTransport, peer: SocketAddr) {
        // 回收已结束的任务和已断开的条目
        while self.handlers.try_join_next().is_some() {}
        let removed = self.registry.compact().await;
        if removed > 0 {
            debug!(removed, "compacted registry");
        }

        let (reader, writer) = Connection::new(transport).split();
        let handler = ConnectionHandler::new(
            peer,
            Arc::clone(&self.registry),
            self.broadcaster.clone(),
            self.shutdown_rx.clone(),
        );
        self.handlers.spawn(handler.run(reader, writer));

        let online = self.registry.connected_count().await;
        debug!(%peer, online, "accepted connection");
    }

    async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        self.registry.close_all().await;

        let drain = async { while self.handlers.join_next().await.is_some() {} };
        if timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(
                remaining = self.handlers.len(),
                "Shutdown timeout, aborting remaining handlers"
            );
            self.handlers.abort_all();
        }

        info!("Server shutdown complete");
    }
}
