//! 聊天中继客户端
//!
//! 交互式命令行客户端，输入 `help` 查看可用命令

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use protocol::RelayConfig;
use relay_client::{spawn_stdin_reader, ClientSession, Console, SharedState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive chat relay client")]
struct Cli {
    #[command(flatten)]
    relay: RelayConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    protocol::load_dotenv();
    let cli = Cli::parse();

    // 日志写到 stderr，不和交互输出混在一起
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relay_client=info".parse()?)
                .add_directive("protocol=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let shared = Arc::new(SharedState::new());

    // Ctrl+C 只置位关闭信号，由分发器负责收尾
    let interrupt = Arc::clone(&shared);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("KeyboardInterrupt");
                interrupt.request_shutdown();
            }
            Err(e) => warn!(error = %e, "failed to install ctrl-c handler"),
        }
    });

    let mut input = spawn_stdin_reader();
    let mut session = ClientSession::new(cli.relay.addr(), Console::stdout(), shared);
    session.start(&mut input).await;

    Ok(())
}
