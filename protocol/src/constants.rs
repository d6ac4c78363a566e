//! 协议常量定义

use std::time::Duration;

/// 登录名最大长度（字节）
pub const MAX_LOGIN_LEN: usize = 64;

/// 单条消息最大长度（字节）
pub const MAX_MESSAGE_LEN: usize = 4096;

/// 消息帧最大大小（不含 4 字节长度前缀）
pub const MAX_FRAME_SIZE: usize = 32 * 1024;

/// 单次读取的块大小
pub const READ_CHUNK_SIZE: usize = 1024;

/// 默认监听/连接主机
pub const DEFAULT_HOST: &str = "localhost";

/// 默认端口
pub const DEFAULT_PORT: u16 = 8888;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 广播单个接收方写入超时（秒）- 慢消费者不能拖住整次广播
pub const BROADCAST_WRITE_TIMEOUT_SECS: u64 = 5;

/// 客户端断开时等待监听任务结束的超时（秒）
pub const CLOSE_TIMEOUT_SECS: u64 = 2;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 广播写入超时 Duration
pub const BROADCAST_WRITE_TIMEOUT: Duration = Duration::from_secs(BROADCAST_WRITE_TIMEOUT_SECS);

/// 关闭等待超时 Duration
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(CLOSE_TIMEOUT_SECS);
