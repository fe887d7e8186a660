use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use coderoom_server::ServerConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "coderoom collaborative editing and execution server")]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/coderoom/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to listen on, overriding the config file.
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Port to listen on, keeping the configured host.
    #[arg(long, env = "PORT")]
    port: Option<u16>,
    /// Allowed CORS origin; repeatable, `*` allows any.
    #[arg(long = "allow-origin")]
    allow_origins: Vec<String>,
    /// Deadline for one execution request, in seconds.
    #[arg(long)]
    exec_timeout_secs: Option<u64>,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(port) = self.port {
            config.listen.set_port(port);
        }
        if !self.allow_origins.is_empty() {
            config.allow_origins = self.allow_origins;
        }
        if let Some(secs) = self.exec_timeout_secs {
            config.execution.timeout_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "coderoom_server=info,libcoderoom=info,tower_http=info".into()
        }))
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    coderoom_server::run(config).await
}
