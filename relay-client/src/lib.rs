//! 聊天中继客户端
//!
//! - [`command`] 解析交互命令
//! - [`console`] 交互输出和标准输入读取线程
//! - [`state`] 监听任务和分发器共享的连接状态、关闭信号
//! - [`listener`] 入站监听，渲染收到的事件
//! - [`session`] 会话生命周期和命令分发

pub mod command;
pub mod console;
pub mod listener;
pub mod session;
pub mod state;

pub use command::{Command, HELP_TEXT};
pub use console::{spawn_stdin_reader, Console};
pub use listener::{listen, render, ListenerExit};
pub use session::{ClientSession, LOGIN_PROMPT};
pub use state::{ConnectionState, SharedState};
