//! 聊天中继服务端
//!
//! 基于 Tokio 的异步 TCP 服务器

use anyhow::Result;
use clap::Parser;
use protocol::RelayConfig;
use relay_server::RelayServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-oriented chat relay server")]
struct Cli {
    #[command(flatten)]
    relay: RelayConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    protocol::load_dotenv();
    let cli = Cli::parse();

    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relay_server=debug".parse()?)
                .add_directive("protocol=debug".parse()?),
        )
        .init();

    let addr = cli.relay.addr();
    info!("Relay server starting on {}", addr);

    let server = RelayServer::bind(&addr).await?;
    server.run_until_ctrl_c().await?;

    Ok(())
}
