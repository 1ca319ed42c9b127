use std::net::SocketAddr;

use log::{error, info, warn};

use rusty_chat::config::ServerConfig;
use rusty_chat::core::server::ChatServer;
use rusty_chat::handlers::routes;

#[tokio::main]
async fn main() {
    // Initialize env
    match dotenvy::dotenv() {
        Ok(_) => info!("Environment variables loaded from .env file"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Initialize logging
    env_logger::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration: host={}, port={}, tls={}", config.host, config.port, config.enable_tls);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let tls_paths = if config.enable_tls {
        config.tls_cert_path.clone().zip(config.tls_key_path.clone())
    } else {
        None
    };

    // In-memory durability backend; a database-backed store plugs in through the same traits
    let (server, _store) = ChatServer::in_memory(config).await;
    let routes = routes(server);

    match tls_paths {
        Some((cert, key)) => {
            info!("Starting Rusty Chat server on wss://{}", addr);
            warp::serve(routes).tls().cert_path(cert).key_path(key).run(addr).await;
        }
        None => {
            info!("Starting Rusty Chat server on ws://{}", addr);
            warp::serve(routes).run(addr).await;
        }
    }
}
