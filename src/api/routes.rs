use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::index))
        .route("/wallet/info", web::get().to(handlers::wallet_info))
        .route("/wallet/transact", web::post().to(handlers::transact))
        .route("/known-addresses", web::get().to(handlers::known_addresses))
        .route("/blockchain", web::get().to(handlers::blockchain))
        .route("/blockchain/mine", web::get().to(handlers::mine))
        .route("/transaction-pool", web::get().to(handlers::transaction_pool));
}
