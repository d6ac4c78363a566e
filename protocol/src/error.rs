//! 错误类型定义

use thiserror::Error;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// 负载无法解析为事件
    #[error("Decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 登录名为空
    #[error("Login cannot be empty")]
    EmptyLogin,

    /// 登录名过长
    #[error("Login too long: {len} bytes (max: {max})")]
    LoginTooLong { len: usize, max: usize },

    /// 消息过长
    #[error("Message too long: {len} bytes (max: {max})")]
    MessageTooLong { len: usize, max: usize },
}

impl ProtocolError {
    /// 是否仅影响单条消息
    ///
    /// 可恢复的错误只丢弃当前帧，连接保持打开；其余错误都会结束连接。
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Decode(_)
                | ProtocolError::EmptyLogin
                | ProtocolError::LoginTooLong { .. }
                | ProtocolError::MessageTooLong { .. }
        )
    }
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
