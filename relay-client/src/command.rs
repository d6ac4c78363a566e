//! 交互命令解析

/// `help` 输出的命令表
pub const HELP_TEXT: &str = "\
Available commands:
- connect           : connect to a server
- disconnect        : disconnect from the server
- send <message>    : send a message to the server
- set_name <name>   : set the client's name
- get_name          : get the client's name
- help              : get 'help' text
- quit              : quit the application";

/// 用户输入的一条命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    /// 消息正文，可以为空
    Send(String),
    SetName(String),
    GetName,
    Help,
    Quit,
    /// 无法识别的输入（原样保留）
    Unknown(String),
}

impl Command {
    /// 解析一行输入，空行返回 None
    ///
    /// 命令关键字不区分大小写，参数保留原样（去掉首尾空白）。
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (line, ""),
        };

        let command = match keyword.to_ascii_lowercase().as_str() {
            "connect" => Command::Connect,
            "disconnect" => Command::Disconnect,
            "send" => Command::Send(rest.to_string()),
            "set_name" => Command::SetName(rest.to_string()),
            "get_name" => Command::GetName,
            "help" => Command::Help,
            "quit" => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        };
        Some(command)
    }
}
