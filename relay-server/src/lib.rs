//! 聊天中继服务端
//!
//! - [`registry`] 以对端地址为键记录连接状态和输出句柄
//! - [`broadcast`] 把一帧事件扇出给除发送方外的所有在线连接
//! - [`handler`] 每个连接一个任务：读帧、更新注册表、触发广播、退出时清理
//! - [`server`] 监听、接受连接、优雅关闭

pub mod broadcast;
pub mod handler;
pub mod registry;
pub mod server;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use handler::{ConnectionHandler, DisconnectReason};
pub use registry::{ConnectionEntry, ConnectionId, ConnectionStatus, OutputHandle, Registry};
pub use server::RelayServer;
