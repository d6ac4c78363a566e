//! 监听任务与命令分发器之间共享的状态

use tokio::sync::watch;

/// 客户端连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// `generation` 区分先后建立的连接，旧连接的监听任务不能改写新连接的状态
    Connected { generation: u64 },
}

/// 共享状态：连接状态 + 关闭信号
#[derive(Debug)]
pub struct SharedState {
    connection: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
}

impl SharedState {
    pub fn new() -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            connection,
            shutdown,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        self.connection.send_replace(state);
    }

    /// 连接在对端被关闭
    ///
    /// 只有当前状态仍是这一代连接时才切到 Disconnected，返回是否发生了切换。
    pub fn mark_lost(&self, generation: u64) -> bool {
        self.connection.send_if_modified(|state| {
            if *state == (ConnectionState::Connected { generation }) {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        })
    }

    /// 置位关闭信号（只会从 false 变为 true）
    pub fn request_shutdown(&self) {
        self.shutdown.send_if_modified(|flag| !std::mem::replace(flag, true));
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
