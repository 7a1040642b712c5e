use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::{debug, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::sync::Arc;
use std::time::Duration;

mod api;
mod blockchain;
mod config;
mod miner;
mod network;
mod node;

use config::NodeConfig;
use miner::MinerError;
use network::{PeerHandle, PeerNetwork};
use node::Node;

fn load_blockchain(config: &NodeConfig) -> anyhow::Result<blockchain::Blockchain> {
    match &config.data_dir {
        Some(data_dir) => {
            std::fs::create_dir_all(data_dir)
                .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
            let blockchain = blockchain::Blockchain::with_storage(data_dir)
                .with_context(|| format!("Failed to open chain storage at {}", data_dir.display()))?;
            info!("Using chain storage at {}", data_dir.display());
            Ok(blockchain)
        }
        None => {
            info!("No data directory configured, keeping the chain in memory");
            Ok(blockchain::Blockchain::new())
        }
    }
}

fn load_wallet(config: &NodeConfig) -> anyhow::Result<blockchain::Wallet> {
    let wallet = match &config.secret_key {
        Some(secret_key) => {
            let bytes = hex::decode(secret_key).context("Wallet secret key must be a hex string")?;
            blockchain::Wallet::from_secret_key(&bytes)?
        }
        None => {
            let wallet = blockchain::Wallet::new()?;
            debug!(
                "Generated wallet secret key: {}",
                hex::encode(wallet.export_secret_key())
            );
            wallet
        }
    };

    info!("Node wallet address: {}", wallet.address());
    Ok(wallet)
}

/// Mines on a fixed interval until the process exits
async fn mine_periodically(node: Arc<Node>, interval: Duration) {
    let mut ticker = actix_web::rt::time::interval(interval);

    loop {
        ticker.tick().await;

        let miner = node.miner().clone();
        match web::block(move || miner.mine_transactions()).await {
            Ok(Ok(_)) => {}
            Ok(Err(MinerError::EmptyMiningSet)) => debug!("Nothing to mine"),
            Ok(Err(err)) => warn!("Mining round failed: {}", err),
            Err(err) => warn!("Mining task failed: {}", err),
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::parse();

    let blockchain = load_blockchain(&config)?;
    let wallet = load_wallet(&config)?;

    let (peers, outbound) = PeerHandle::channel();
    let node = Arc::new(Node::new(blockchain, wallet, peers, config.mining_config()));

    match PeerNetwork::new(&config.network_config(), node.clone(), outbound) {
        Ok(network) => {
            actix_web::rt::spawn(network.run());
        }
        Err(err) => warn!("Peer network disabled: {}", err),
    }

    if let Some(secs) = config.mine_interval_secs.filter(|secs| *secs > 0) {
        info!("Mining every {} seconds", secs);
        actix_web::rt::spawn(mine_periodically(node.clone(), Duration::from_secs(secs)));
    }

    let port = config.http_port();
    info!("Starting HTTP server at http://{}:{}", config.host, port);

    let node = web::Data::from(node);
    let openapi = api::ApiDoc::openapi();

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(node.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone()),
            )
    })
    .bind((config.host.as_str(), port))?
    .run()
    .await?;

    Ok(())
}
