use std::sync::Arc;

use distributed_textstore::directory::service::{self, DirectoryState};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <ip> <port> [--enable-exec]", args[0]);
        eprintln!("Example: {} 127.0.0.1 5000", args[0]);
        std::process::exit(1);
    }

    let ip = args[1].clone();
    let port = parse_port(&args[2]);
    let allow_exec = args.iter().skip(3).any(|a| a == "--enable-exec");
    if allow_exec {
        tracing::warn!("EXEC is enabled; file contents can run on this host");
    }

    let listener = match TcpListener::bind((ip.as_str(), port)).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: could not bind {ip}:{port}: {e}");
            std::process::exit(1);
        }
    };

    let state: Arc<DirectoryState> = DirectoryState::new(allow_exec);
    tracing::info!("Directory listening on {}:{}", ip, port);
    service::serve(listener, state).await
}

fn parse_port(raw: &str) -> u16 {
    match raw.parse::<u32>() {
        Ok(port) if (1025..=65535).contains(&port) => port as u16,
        _ => {
            eprintln!("Error: port must be between 1025 and 65535.");
            std::process::exit(1);
        }
    }
}
