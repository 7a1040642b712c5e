// API module
//
// HTTP interface of the node and its OpenAPI document

pub mod handlers;
pub mod routes;

use utoipa::OpenApi;

use crate::blockchain;

// Re-export main components for easier access
pub use routes::configure_routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::index,
        handlers::wallet_info,
        handlers::known_addresses,
        handlers::transact,
        handlers::blockchain,
        handlers::mine,
        handlers::transaction_pool
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::TransactionInput,
            blockchain::Address,
            blockchain::DigitalSignature,
            handlers::WalletInfo,
            handlers::TransactRequest,
            handlers::ErrorResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger node API endpoints")
    ),
    info(
        title = "Ledger Node API",
        version = "0.1.0",
        description = "Wallet, transaction pool and blockchain of a proof-of-work ledger node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_routes() {
        let doc = ApiDoc::openapi();

        for path in [
            "/",
            "/wallet/info",
            "/wallet/transact",
            "/known-addresses",
            "/blockchain",
            "/blockchain/mine",
            "/transaction-pool",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
