//! 交互输出和行输入

use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// 交互输出
///
/// 监听任务和命令分发器共用，整行写入互不交错。
pub struct Console<O = Stdout> {
    out: Arc<Mutex<O>>,
}

impl<O> Clone for Console<O> {
    fn clone(&self) -> Self {
        Self {
            out: Arc::clone(&self.out),
        }
    }
}

impl Console<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<O: AsyncWrite + Unpin + Send> Console<O> {
    pub fn new(out: O) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    /// 输出一行
    pub async fn line(&self, text: impl AsRef<str>) {
        let mut out = self.out.lock().await;
        let result = async {
            out.write_all(text.as_ref().as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await
        }
        .await;
        if let Err(e) = result {
            debug!(error = %e, "console write failed");
        }
    }

    /// 输出提示符（不换行）
    pub async fn prompt(&self, text: &str) {
        let mut out = self.out.lock().await;
        let result = async {
            out.write_all(text.as_bytes()).await?;
            out.flush().await
        }
        .await;
        if let Err(e) = result {
            debug!(error = %e, "console write failed");
        }
    }
}

/// 在独立线程里阻塞读取标准输入，逐行转发
///
/// 通道关闭即表示输入结束。专用线程不属于 runtime，退出时不会卡在未完成的读取上。
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });
    rx
}
