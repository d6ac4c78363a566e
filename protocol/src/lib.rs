//! 中继共享协议库
//!
//! 包含:
//! - 事件类型定义 (Event)
//! - 帧编解码 (4 字节长度前缀 + JSON 负载)
//! - 传输层抽象 (Transport trait)
//! - 连接封装 (Connection)
//! - 地址配置 (RelayConfig)

mod codec;
mod config;
mod connection;
mod constants;
mod error;
mod message;
mod transport;

pub use codec::{
    decode_event, encode_event, encode_frame, FrameDecoder, FrameReader, FrameWriter,
    LENGTH_PREFIX_SIZE,
};
pub use config::{load_dotenv, RelayConfig};
pub use connection::Connection;
pub use constants::*;
pub use error::{ProtocolError, Result};
pub use message::{validate_login, Event};
pub use transport::{TcpListener, TcpTransport, Transport, TransportConfig, TransportListener};
