//! 入站监听：解码服务器转发的事件并渲染到控制台

use std::sync::Arc;

use protocol::{Event, FrameReader, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use crate::console::Console;
use crate::state::SharedState;

/// 监听任务结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerExit {
    /// 对端关闭（包括本地主动关闭后读到的 EOF）
    Closed,
    /// 读取出错
    Error,
    /// 收到关闭信号
    Shutdown,
}

/// 把事件渲染为一行文本
pub fn render(event: &Event) -> String {
    match event {
        Event::Message { login, text } => format!("[{login}] > {text}"),
        Event::Join { login } => format!("User {login} has joined."),
        Event::Leave { login } => format!("User {login} has left."),
    }
}

/// 运行入站监听，直到连接关闭或收到关闭信号
///
/// 连接意外结束时把这一代连接标记为断开，分发器随后不会再假定连接可用。
/// 由本地 `disconnect` 引起的关闭，状态已经先被分发器改掉，这里不会重复提示。
pub async fn listen<R, O>(
    mut reader: FrameReader<R>,
    console: Console<O>,
    shared: Arc<SharedState>,
    generation: u64,
) -> ListenerExit
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin + Send,
{
    let mut shutdown_rx = shared.subscribe_shutdown();

    let exit = loop {
        if shared.is_shutdown() {
            break ListenerExit::Shutdown;
        }

        let result = tokio::select! {
            result = reader.recv() => result,
            _ = shutdown_rx.changed() => break ListenerExit::Shutdown,
        };

        match result {
            Ok(event) => console.line(render(&event)).await,
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "dropping undecodable event");
            }
            Err(ProtocolError::ConnectionClosed) => {
                info!("listener: connection closed");
                break ListenerExit::Closed;
            }
            Err(e) => {
                warn!(error = %e, "error while receiving data");
                break ListenerExit::Error;
            }
        }
    };

    // 关闭信号由分发器统一收尾（还要发送 Leave），不在这里改状态
    if exit != ListenerExit::Shutdown && shared.mark_lost(generation) {
        console
            .line("Connection closed by server. Use 'connect' to reconnect.")
            .await;
    }

    exit
}
