use std::sync::Arc;

use distributed_textstore::node::persistence::NodeStorage;
use distributed_textstore::node::service::{self, NodeState};
use tokio::net::{TcpListener, TcpStream};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 5 {
        eprintln!(
            "Usage: {} <node_ip> <node_port> <directory_ip> <directory_port>",
            args[0]
        );
        eprintln!("Example: {} 127.0.0.1 9001 127.0.0.1 5000", args[0]);
        std::process::exit(1);
    }

    let node_ip = args[1].clone();
    let node_port = parse_port(&args[2]);
    let directory_ip = args[3].clone();
    let directory_port = parse_port(&args[4]);

    let storage = match NodeStorage::open(format!("ss_{node_port}")) {
        Ok(storage) => storage,
        Err(e) => {
            eprintln!("Error: could not open storage directory: {e}");
            std::process::exit(1);
        }
    };
    let state = Arc::new(NodeState::new(storage));
    tracing::info!(
        "Node starting on {}:{} with {} file(s)",
        node_ip,
        node_port,
        state.store.files.len()
    );

    // Public listener for direct Client connections.
    let listener = match TcpListener::bind((node_ip.as_str(), node_port)).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Error: could not bind {node_ip}:{node_port}: {e}");
            std::process::exit(1);
        }
    };

    // Persistent control link to the Directory.
    let mut directory = match TcpStream::connect((directory_ip.as_str(), directory_port)).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("Error: could not reach Directory at {directory_ip}:{directory_port}: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) =
        service::register_with_directory(&mut directory, &state, &node_ip, node_port as i32).await
    {
        eprintln!("Error: Directory rejected registration: {e}");
        std::process::exit(1);
    }

    tokio::select! {
        result = service::serve_clients(listener, state.clone()) => {
            result?;
        }
        result = service::control_loop(directory, state.clone()) => {
            tracing::warn!("Directory link closed; shutting down");
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received; shutting down");
        }
    }

    tracing::info!("Node {} shutdown complete", node_port);
    Ok(())
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
