//! 客户端会话
//!
//! 一个会话同一时刻最多持有一个出站连接，运行两个并发循环：
//! - 入站监听（[`crate::listener::listen`]），连接建立后启动；
//! - 命令分发器（[`ClientSession::run`]），只在读取下一行输入时挂起。
//!
//! 两者通过 [`SharedState`] 中的连接状态和关闭信号协作。

use std::sync::Arc;

use protocol::{
    validate_login, Connection, Event, FrameWriter, ProtocolError, TcpTransport, Transport,
    TransportConfig, CLOSE_TIMEOUT,
};
use tokio::io::{AsyncWrite, Stdout};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::command::{Command, HELP_TEXT};
use crate::console::Console;
use crate::listener::{listen, ListenerExit};
use crate::state::{ConnectionState, SharedState};

/// 启动时询问登录名的提示符
pub const LOGIN_PROMPT: &str = "Please, print your nickname > ";

/// 当前打开的连接：写端归分发器独占，读端交给监听任务
struct ActiveConnection {
    writer: FrameWriter<OwnedWriteHalf>,
    listener: JoinHandle<ListenerExit>,
    generation: u64,
}

/// 客户端会话
pub struct ClientSession<O = Stdout> {
    addr: String,
    transport: TransportConfig,
    login: String,
    shared: Arc<SharedState>,
    console: Console<O>,
    active: Option<ActiveConnection>,
    next_generation: u64,
}

impl<O> ClientSession<O>
where
    O: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(addr: impl Into<String>, console: Console<O>, shared: Arc<SharedState>) -> Self {
        Self {
            addr: addr.into(),
            transport: TransportConfig::default(),
            login: String::new(),
            shared,
            console,
            active: None,
            next_generation: 1,
        }
    }

    pub fn with_transport_config(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection_state()
    }

    /// 询问登录名后运行命令分发器
    ///
    /// 输入在给出登录名之前结束时置位关闭信号并直接返回。
    pub async fn start(&mut self, input: &mut mpsc::Receiver<String>) {
        if !self.prompt_login(input).await {
            info!("no nickname supplied, aborting startup");
            return;
        }
        self.run(input).await;
    }

    /// 交互式读取初始登录名，空名字会被拒绝并重新询问
    pub async fn prompt_login(&mut self, input: &mut mpsc::Receiver<String>) -> bool {
        let mut shutdown_rx = self.shared.subscribe_shutdown();

        loop {
            if self.shared.is_shutdown() {
                return false;
            }
            self.console.prompt(LOGIN_PROMPT).await;

            let line = tokio::select! {
                line = input.recv() => line,
                _ = shutdown_rx.changed() => None,
            };
            let Some(line) = line else {
                self.shared.request_shutdown();
                return false;
            };

            let name = line.trim();
            match validate_login(name) {
                Ok(()) => {
                    self.login = name.to_string();
                    self.console.line(format!("Name set to: {}", self.login)).await;
                    return true;
                }
                Err(e) => {
                    warn!(error = %e, "rejected nickname");
                    self.console.line(format!("Invalid name: {e}")).await;
                }
            }
        }
    }

    /// 命令分发循环
    ///
    /// `quit`、输入结束或关闭信号都会结束循环，随后执行最终清理。
    pub async fn run(&mut self, input: &mut mpsc::Receiver<String>) {
        let mut shutdown_rx = self.shared.subscribe_shutdown();

        loop {
            if self.shared.is_shutdown() {
                break;
            }

            let line = tokio::select! {
                line = input.recv() => line,
                _ = shutdown_rx.changed() => break,
            };

            let Some(line) = line else {
                info!("end of input");
                self.disconnect().await;
                break;
            };

            let Some(command) = Command::parse(&line) else {
                continue;
            };
            if !self.execute(command).await {
                break;
            }
        }

        self.close().await;
    }

    /// 执行一条命令，返回 false 表示分发器应当结束
    pub async fn execute(&mut self, command: Command) -> bool {
        debug!(?command, "dispatching");
        match command {
            Command::Connect => self.connect().await,
            Command::Disconnect => {
                if !self.disconnect().await {
                    self.console.line("Not connected.").await;
                }
            }
            Command::Send(text) => self.send_message(text).await,
            Command::SetName(name) => self.set_name(name).await,
            Command::GetName => {
                self.console
                    .line(format!("Your nickname: {}", self.login))
                    .await
            }
            Command::Help => self.console.line(HELP_TEXT).await,
            Command::Quit => {
                self.disconnect().await;
                self.console.line("Exiting...").await;
                return false;
            }
            Command::Unknown(_) => {
                self.console
                    .line("Unknown command. Type 'help' to list available ones.")
                    .await
            }
        }
        true
    }

    /// 建立连接、启动监听并发送 Join；已连接时什么也不做
    pub async fn connect(&mut self) {
        if self.ensure_live().await {
            info!(addr = %self.addr, "connect requested while already connected");
            self.console
                .line(format!("Already connected to {}.", self.addr))
                .await;
            return;
        }

        self.shared.set_connection_state(ConnectionState::Connecting);
        let transport = match TcpTransport::connect(&self.addr, &self.transport).await {
            Ok(transport) => transport,
            Err(e) => {
                self.shared
                    .set_connection_state(ConnectionState::Disconnected);
                match &e {
                    ProtocolError::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                        warn!(addr = %self.addr, error = %e, "connection refused, is the server running?")
                    }
                    _ => warn!(addr = %self.addr, error = %e, "connection attempt failed"),
                }
                self.console
                    .line(format!("Could not connect to {}: {e}", self.addr))
                    .await;
                return;
            }
        };

        let (reader, writer) = Connection::new(transport).split();
        let generation = self.next_generation;
        self.next_generation += 1;

        self.shared
            .set_connection_state(ConnectionState::Connected { generation });
        let listener = tokio::spawn(listen(
            reader,
            self.console.clone(),
            Arc::clone(&self.shared),
            generation,
        ));
        self.active = Some(ActiveConnection {
            writer,
            listener,
            generation,
        });

        info!(addr = %self.addr, "Connected to server");
        self.console
            .line(format!("Connected to server at {}", self.addr))
            .await;

        self.send_event(Event::join(self.login.clone())).await;
    }

    /// 发送 Leave、关闭连接并等待监听任务结束，未连接时返回 false
    pub async fn disconnect(&mut self) -> bool {
        if !self.ensure_live().await {
            debug!("disconnect requested while not connected");
            return false;
        }
        self.leave_and_close().await;
        info!("Disconnected.");
        self.console.line("Disconnected.").await;
        true
    }

    /// 发送聊天消息；未连接时丢弃并提示
    pub async fn send_message(&mut self, text: String) {
        if !self.ensure_live().await {
            warn!("tried to send a message while not connected");
            self.console
                .line("Not connected. Use 'connect' first.")
                .await;
            return;
        }

        let event = Event::message(self.login.clone(), text);
        if let Err(e) = event.validate() {
            self.console.line(format!("Message rejected: {e}")).await;
            return;
        }
        self.send_event(event).await;
    }

    /// 修改登录名；连接期间或名字无效时拒绝，状态不变
    pub async fn set_name(&mut self, name: String) {
        if self.ensure_live().await {
            warn!("tried to change nickname while connected");
            self.console
                .line("You cannot change name while connected to server. Disconnect first.")
                .await;
            return;
        }

        if let Err(e) = validate_login(&name) {
            warn!(error = %e, "rejected nickname");
            self.console.line(format!("Invalid name: {e}")).await;
            return;
        }

        self.login = name;
        self.console
            .line(format!("Name set to: {}", self.login))
            .await;
    }

    /// 最终清理：连接仍然打开时再发一次 Leave 并关闭
    pub async fn close(&mut self) {
        info!("Closing the connection");
        if self.ensure_live().await {
            self.leave_and_close().await;
        }
    }

    /// 当前连接是否可用
    ///
    /// 监听任务已把这一代连接标记为断开时，顺带回收残留的写端和任务。
    async fn ensure_live(&mut self) -> bool {
        let Some(active) = &self.active else {
            return false;
        };
        let live = self.shared.connection_state()
            == (ConnectionState::Connected {
                generation: active.generation,
            });
        if !live {
            if let Some(stale) = self.active.take() {
                debug!(generation = stale.generation, "reaping dead connection");
                Self::teardown(stale).await;
            }
        }
        live
    }

    async fn leave_and_close(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        // 先改状态，监听任务随后读到的 EOF 就不会被当作服务器断开
        self.shared
            .set_connection_state(ConnectionState::Disconnected);

        if let Err(e) = active.writer.send(&Event::leave(self.login.clone())).await {
            warn!(error = %e, "failed to send leave event");
        }
        Self::teardown(active).await;
    }

    /// 发送事件；写失败时把连接视为丢失
    async fn send_event(&mut self, event: Event) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let result = active.writer.send(&event).await;
        if let Err(e) = result {
            warn!(error = %e, event = event.kind(), "connection error while sending");
            let generation = active.generation;
            self.shared.mark_lost(generation);
            if let Some(active) = self.active.take() {
                Self::teardown(active).await;
            }
            self.console.line(format!("Connection lost: {e}")).await;
        }
    }

    /// 关闭写方向，然后等待监听任务读到 EOF 自然结束
    async fn teardown(mut active: ActiveConnection) {
        if let Err(e) = active.writer.shutdown().await {
            debug!(error = %e, "shutdown on broken connection");
        }
        match timeout(CLOSE_TIMEOUT, &mut active.listener).await {
            Ok(Ok(exit)) => debug!(?exit, "listener finished"),
            Ok(Err(e)) => warn!(error = %e, "listener task failed"),
            Err(_) => {
                warn!("listener did not observe close in time, aborting");
                active.listener.abort();
            }
        }
    }
}
