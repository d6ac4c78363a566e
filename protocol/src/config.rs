//! 地址配置
//!
//! 服务端和客户端共用：命令行参数优先，其次是环境变量 `HOST`/`PORT`
//! （可以写在工作目录下的 `.env` 文件里），最后是默认值。

use std::path::PathBuf;

use clap::Args;

use crate::{DEFAULT_HOST, DEFAULT_PORT};

/// 中继地址配置
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// 服务器主机名或 IP
    #[arg(long, env = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// 服务器端口
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

impl RelayConfig {
    /// "host:port" 形式的地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// 加载 `.env` 文件（如果存在），必须在解析参数之前调用
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}
