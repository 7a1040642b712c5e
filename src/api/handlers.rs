use actix_web::{web, HttpResponse, Responder};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Address, Block, Transaction, TransactionError};
use crate::miner::MinerError;
use crate::node::Node;

/// Node state shared with the handlers
pub type NodeData = web::Data<Node>;

/// Response for the wallet info endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WalletInfo {
    /// The node wallet's address
    pub address: Address,

    /// Its balance on the current chain
    pub balance: u64,
}

/// Request for the transact endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactRequest {
    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: u64,
}

/// Body of every error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    fn new(error: impl ToString) -> Self {
        ErrorResponse {
            error: error.to_string(),
        }
    }
}

/// Welcome page
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Node is up", body = String)
    )
)]
pub async fn index() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Welcome to the blockchain")
}

/// Get the node wallet
///
/// Returns the address of the node's wallet and its balance
#[utoipa::path(
    get,
    path = "/wallet/info",
    responses(
        (status = 200, description = "Wallet retrieved successfully", body = WalletInfo)
    )
)]
pub async fn wallet_info(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(WalletInfo {
        address: node.address().clone(),
        balance: node.balance().await,
    })
}

/// Get known addresses
///
/// Returns every address that received coins on the chain
#[utoipa::path(
    get,
    path = "/known-addresses",
    responses(
        (status = 200, description = "Known addresses retrieved successfully", body = Vec<Address>)
    )
)]
pub async fn known_addresses(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.known_addresses().await)
}

/// Send coins from the node wallet
///
/// Creates a transaction, or extends the wallet's pending one, and
/// broadcasts it to peers
#[utoipa::path(
    post,
    path = "/wallet/transact",
    request_body = TransactRequest,
    responses(
        (status = 200, description = "Transaction created successfully", body = Transaction),
        (status = 400, description = "Insufficient funds, invalid amount or invalid recipient", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn transact(node: NodeData, request: web::Json<TransactRequest>) -> impl Responder {
    let recipient = match request.recipient.parse::<Address>() {
        Ok(recipient) => recipient,
        Err(err) => {
            let err = TransactionError::InvalidRecipientAddress(err.to_string());
            debug!("Rejected transaction request: {}", err);
            return HttpResponse::BadRequest().json(ErrorResponse::new(err));
        }
    };

    match node.transact(&recipient, request.amount).await {
        Ok(transaction) => HttpResponse::Ok().json(transaction),
        Err(
            err @ (TransactionError::InsufficientFunds { .. }
            | TransactionError::InvalidAmount(_)
            | TransactionError::InvalidRecipientAddress(_)),
        ) => {
            debug!("Rejected transaction request: {}", err);
            HttpResponse::BadRequest().json(ErrorResponse::new(err))
        }
        Err(err) => {
            error!("Failed to create transaction: {}", err);
            HttpResponse::InternalServerError().json(ErrorResponse::new(err))
        }
    }
}

/// Get the full blockchain
#[utoipa::path(
    get,
    path = "/blockchain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = Vec<Block>)
    )
)]
pub async fn blockchain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.chain().await)
}

/// Mine the transaction pool
///
/// Mines the valid pending transactions into a new block and broadcasts the
/// resulting chain
#[utoipa::path(
    get,
    path = "/blockchain/mine",
    responses(
        (status = 200, description = "Block mined successfully", body = Block),
        (status = 400, description = "No valid transactions to mine", body = ErrorResponse),
        (status = 409, description = "A longer chain was adopted while mining", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn mine(node: NodeData) -> impl Responder {
    let miner = node.miner().clone();

    match web::block(move || miner.mine_transactions()).await {
        Ok(Ok(block)) => HttpResponse::Ok().json(block),
        Ok(Err(err @ MinerError::EmptyMiningSet)) => {
            debug!("Nothing to mine: {}", err);
            HttpResponse::BadRequest().json(ErrorResponse::new(err))
        }
        Ok(Err(err @ MinerError::Rejected(_))) => {
            warn!("{}", err);
            HttpResponse::Conflict().json(ErrorResponse::new(err))
        }
        Ok(Err(err)) => {
            error!("Mining failed: {}", err);
            HttpResponse::InternalServerError().json(ErrorResponse::new(err))
        }
        Err(err) => {
            error!("Mining task failed: {}", err);
            HttpResponse::InternalServerError().json(ErrorResponse::new(err))
        }
    }
}

/// Get pending transactions
#[utoipa::path(
    get,
    path = "/transaction-pool",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn transaction_pool(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.pool().transactions())
}
