//! Concierge CLI
//!
//! 入口：初始化日志、加载配置、创建编排器，执行 route / ask / domains 子命令。

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use concierge::config::load_config;
use concierge::core::{create_orchestrator, Request, StreamEvent};

/// 多领域智能助手：意图路由、流式回答与长期记忆
#[derive(Parser, Debug)]
#[command(name = "concierge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// User identity for memory lookups
    #[arg(long, global = true, default_value = "cli-user")]
    user: String,

    /// Session id recorded with memories
    #[arg(long, global = true)]
    session: Option<String>,

    /// Override the per-request deadline
    #[arg(long, global = true, value_name = "SECS")]
    deadline_secs: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which domain a message would be routed to
    Route {
        message: Vec<String>,
    },

    /// Ask a question and stream the answer to stdout
    Ask {
        message: Vec<String>,
    },

    /// List configured domains and their dependency health
    Domains {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn request(&self, message: &[String]) -> Request {
        let mut req = Request::new(self.user.clone(), message.join(" "));
        if let Some(session) = &self.session {
            req = req.with_session(session.clone());
        }
        if let Some(secs) = self.deadline_secs {
            req = req.with_deadline(Duration::from_secs(secs));
        }
        req
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    concierge::observability::init_with_level(cli.log.as_deref());

    let cfg = load_config(cli.config.clone()).context("Failed to load configuration")?;
    let orchestrator = create_orchestrator(&cfg).context("Failed to build orchestrator")?;

    match &cli.command {
        Command::Route { message } => {
            let decision = orchestrator.route(&cli.request(message)).await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Command::Domains { json } => {
            let health = orchestrator.health();
            if *json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                for h in &health {
                    let deps: Vec<String> = h
                        .dependencies
                        .iter()
                        .map(|d| format!("{}{}", d.name, if d.ready { "" } else { " (not ready)" }))
                        .collect();
                    println!(
                        "{:<10} {:<9} {}{}",
                        h.domain.as_str(),
                        if h.ready { "ready" } else { "degraded" },
                        deps.join(", "),
                        if h.fallback { "  [fallback]" } else { "" }
                    );
                }
            }
        }
        Command::Ask { message } => {
            let mut handle = orchestrator.stream(cli.request(message));
            let cancel = handle.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });

            let mut stdout = std::io::stdout();
            let mut failed = false;
            while let Some(event) = handle.recv().await {
                match event {
                    StreamEvent::Status { text } => eprintln!("{}", text),
                    StreamEvent::Content { text } => {
                        write!(stdout, "{}", text)?;
                        stdout.flush()?;
                    }
                    StreamEvent::ToolError { message } => eprintln!("[tool] {}", message),
                    StreamEvent::Done { domain, fragments } => {
                        println!();
                        tracing::debug!(%domain, fragments, "done");
                    }
                    StreamEvent::Error { kind, message } => {
                        println!();
                        eprintln!("error ({:?}): {}", kind, message);
                        failed = true;
                    }
                    StreamEvent::Cancelled { reason } => {
                        println!();
                        eprintln!("cancelled: {}", reason);
                        failed = true;
                    }
                }
            }
            // 留出时间让后台记忆写入完成
            tokio::time::sleep(Duration::from_millis(100)).await;
            if failed {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
