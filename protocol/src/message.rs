//! 事件类型定义

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::{MAX_LOGIN_LEN, MAX_MESSAGE_LEN};

/// 客户端与中继之间交换的聊天事件
///
/// 线上格式为带 `event` 标签的 JSON 对象，例如
/// `{"event":"message","login":"alice","text":"hello"}`。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    /// 加入
    Join { login: String },
    /// 离开
    Leave { login: String },
    /// 聊天消息
    Message {
        login: String,
        #[serde(default)]
        text: String,
    },
}

impl Event {
    pub fn join(login: impl Into<String>) -> Self {
        Event::Join {
            login: login.into(),
        }
    }

    pub fn leave(login: impl Into<String>) -> Self {
        Event::Leave {
            login: login.into(),
        }
    }

    pub fn message(login: impl Into<String>, text: impl Into<String>) -> Self {
        Event::Message {
            login: login.into(),
            text: text.into(),
        }
    }

    /// 事件所属的登录名
    pub fn login(&self) -> &str {
        match self {
            Event::Join { login } | Event::Leave { login } | Event::Message { login, .. } => login,
        }
    }

    /// 事件名，与线上的 `event` 标签一致
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Join { .. } => "join",
            Event::Leave { .. } => "leave",
            Event::Message { .. } => "message",
        }
    }

    /// 校验事件内容是否符合约束
    pub fn validate(&self) -> Result<()> {
        validate_login(self.login())?;
        if let Event::Message { text, .. } = self {
            if text.len() > MAX_MESSAGE_LEN {
                return Err(ProtocolError::MessageTooLong {
                    len: text.len(),
                    max: MAX_MESSAGE_LEN,
                });
            }
        }
        Ok(())
    }
}

/// 校验登录名：非空且不超过 [`MAX_LOGIN_LEN`]
pub fn validate_login(login: &str) -> Result<()> {
    if login.is_empty() {
        return Err(ProtocolError::EmptyLogin);
    }
    if login.len() > MAX_LOGIN_LEN {
        return Err(ProtocolError::LoginTooLong {
            len: login.len(),
            max: MAX_LOGIN_LEN,
        });
    }
    Ok(())
}
