//! HTTP surface: one route per lifecycle transition plus the trade
//! read endpoint and a liveness probe.
//!
//! Request and response field names follow the established wire
//! contract (`tradeId`, `priceETH`, `fileHash`, `txHash`); amounts
//! cross the boundary as decimal strings in the display unit and are
//! converted at the gateway edge.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use escrow_core::error::TradeError;
use escrow_core::gateway::{CreateTradeRequest, ResolutionRequest, TradeGateway, TransitionReceipt};
use escrow_core::model::Principal;
use escrow_core::settlement::HttpLedger;

/// Shared state for the route handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<TradeGateway>,
    /// Process-held credentials, one per role the service acts as
    pub seller: Principal,
    pub buyer: Principal,
    pub arbiter: Principal,
    /// Present when a remote settlement backend is configured
    pub backend: Option<Arc<HttpLedger>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/createTrade", post(create_trade))
        .route("/getTrade/:id", get(get_trade))
        .route("/deposit", post(deposit))
        .route("/markShipped", post(mark_shipped))
        .route("/confirm", post(confirm))
        .route("/dispute", post(dispute))
        .route("/resolveDispute", post(resolve_dispute))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error wrapper mapping the lifecycle taxonomy onto HTTP statuses
pub struct ApiError(TradeError);

impl From<TradeError> for ApiError {
    fn from(err: TradeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TradeError::Validation(_) => StatusCode::BAD_REQUEST,
            TradeError::Unauthorized(_) => StatusCode::FORBIDDEN,
            TradeError::NotFound(_) => StatusCode::NOT_FOUND,
            TradeError::Conflict(_) | TradeError::InvalidTransition { .. } => StatusCode::CONFLICT,
            TradeError::SettlementPending(_) => StatusCode::ACCEPTED,
            TradeError::SettlementFailure(_) | TradeError::BackendUnavailable(_) => {
                StatusCode::BAD_GATEWAY
            }
            TradeError::Serialization(_) | TradeError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        let body = Json(serde_json::json!({
            "ok": false,
            "error": self.0.to_string(),
            "code": self.0.code(),
        }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct CreateTradeBody {
    #[serde(rename = "tradeId")]
    trade_id: String,
    buyer: String,
    #[serde(rename = "priceETH")]
    price_eth: String,
    #[serde(rename = "fileHash")]
    file_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DepositBody {
    #[serde(rename = "tradeId")]
    trade_id: String,
    #[serde(rename = "priceETH")]
    price_eth: String,
}

#[derive(Debug, Deserialize)]
struct TradeIdBody {
    #[serde(rename = "tradeId")]
    trade_id: String,
}

#[derive(Debug, Deserialize)]
struct DisputeBody {
    #[serde(rename = "tradeId")]
    trade_id: String,
    /// Which configured party raises the dispute; defaults to the buyer
    actor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResolveBody {
    #[serde(rename = "tradeId")]
    trade_id: String,
    /// Legacy integer code: 1 refunds the buyer, anything else pays
    /// the seller the full escrowed amount
    resolution: Option<i64>,
    /// Explicit split recipient; used together with `amountETH`
    recipient: Option<String>,
    #[serde(rename = "amountETH")]
    amount_eth: Option<String>,
}

#[derive(Debug, Serialize)]
struct TxResponse {
    ok: bool,
    #[serde(rename = "txHash")]
    tx_hash: String,
    status: u8,
    #[serde(rename = "statusName")]
    status_name: String,
}

impl From<TransitionReceipt> for TxResponse {
    fn from(receipt: TransitionReceipt) -> Self {
        Self {
            ok: true,
            tx_hash: receipt.tx_hash,
            status: receipt.status,
            status_name: receipt.status_name,
        }
    }
}

#[derive(Debug, Serialize)]
struct GetTradeResponse {
    ok: bool,
    seller: String,
    buyer: String,
    #[serde(rename = "amountETH")]
    amount_eth: String,
    #[serde(rename = "fileHash")]
    file_hash: String,
    status: u8,
    #[serde(rename = "statusName")]
    status_name: String,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
}

async fn create_trade(
    State(state): State<AppState>,
    Json(body): Json<CreateTradeBody>,
) -> Result<Json<TxResponse>, ApiError> {
    let receipt = state
        .gateway
        .create_trade(
            &state.seller,
            CreateTradeRequest {
                trade_id: body.trade_id,
                buyer: body.buyer,
                price: body.price_eth,
                content_ref: body.file_hash,
            },
        )
        .await?;
    Ok(Json(receipt.into()))
}

async fn get_trade(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GetTradeResponse>, ApiError> {
    let view = state.gateway.get_trade(&id).await?;
    Ok(Json(GetTradeResponse {
        ok: true,
        seller: view.seller,
        buyer: view.buyer,
        amount_eth: view.amount,
        file_hash: view.content_ref,
        status: view.status,
        status_name: view.status_name,
        created_at: view.created_at,
    }))
}

async fn deposit(
    State(state): State<AppState>,
    Json(body): Json<DepositBody>,
) -> Result<Json<TxResponse>, ApiError> {
    let receipt = state
        .gateway
        .deposit(&state.buyer, &body.trade_id, &body.price_eth)
        .await?;
    Ok(Json(receipt.into()))
}

async fn mark_shipped(
    State(state): State<AppState>,
    Json(body): Json<TradeIdBody>,
) -> Result<Json<TxResponse>, ApiError> {
    let receipt = state
        .gateway
        .mark_shipped(&state.seller, &body.trade_id)
        .await?;
    Ok(Json(receipt.into()))
}

async fn confirm(
    State(state): State<AppState>,
    Json(body): Json<TradeIdBody>,
) -> Result<Json<TxResponse>, ApiError> {
    let receipt = state
        .gateway
        .confirm_received(&state.buyer, &body.trade_id)
        .await?;
    Ok(Json(receipt.into()))
}

async fn dispute(
    State(state): State<AppState>,
    Json(body): Json<DisputeBody>,
) -> Result<Json<TxResponse>, ApiError> {
    let actor = match body.actor.as_deref() {
        None | Some("buyer") => &state.buyer,
        Some("seller") => &state.seller,
        Some(other) => {
            return Err(ApiError(TradeError::validation(format!(
                "unknown dispute actor '{other}'; expected 'buyer' or 'seller'"
            ))))
        }
    };
    let receipt = state.gateway.raise_dispute(actor, &body.trade_id).await?;
    Ok(Json(receipt.into()))
}

async fn resolve_dispute(
    State(state): State<AppState>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<TxResponse>, ApiError> {
    let request = resolution_from_wire(&body)?;
    let receipt = state
        .gateway
        .resolve_dispute(&state.arbiter, &body.trade_id, request)
        .await?;
    Ok(Json(receipt.into()))
}

/// Map the wire body onto a resolution request. An explicit
/// recipient/amount pair takes precedence over the legacy integer
/// code; with neither present the request is malformed.
fn resolution_from_wire(body: &ResolveBody) -> Result<ResolutionRequest, TradeError> {
    match (&body.recipient, &body.amount_eth, body.resolution) {
        (Some(recipient), Some(amount), _) => Ok(ResolutionRequest::SplitTo {
            recipient: recipient.clone(),
            amount: amount.clone(),
        }),
        (Some(_), None, _) | (None, Some(_), _) => Err(TradeError::validation(
            "recipient and amountETH must be provided together",
        )),
        (None, None, Some(1)) => Ok(ResolutionRequest::FullRefund),
        (None, None, Some(_)) => Ok(ResolutionRequest::SellerFull),
        (None, None, None) => Err(TradeError::validation(
            "resolution code or recipient/amountETH pair is required",
        )),
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let backend = match &state.backend {
        None => "in-process",
        Some(ledger) => match ledger.ping().await {
            Ok(()) => "reachable",
            Err(_) => "unreachable",
        },
    };
    Json(serde_json::json!({ "ok": backend != "unreachable", "backend": backend }))
}
