use crate::domain::payment::{Payment, PaymentStatus, RawAmount};
use crate::domain::transfer::BlockHash;
use crate::error::GatewayError;
use chrono::{DateTime, Utc};
use poem::http::StatusCode;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::error;

/// Client view of a payment.
///
/// `token` is present on the merchant-facing routes and absent on admin
/// listings, which are keyed by account instead.
#[derive(Debug, Serialize, PartialEq)]
pub struct PaymentResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub index: u64,
    pub account: String,
    pub amount: RawAmount,
    pub amount_in_currency: Decimal,
    pub currency: String,
    pub state: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub block_hash: Option<BlockHash>,
    pub received_amount: Option<RawAmount>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl PaymentResponse {
    pub fn new(payment: Payment, token: Option<String>) -> Self {
        Self {
            token,
            index: payment.index,
            account: payment.account.to_string(),
            amount: payment.amount,
            amount_in_currency: payment.amount_in_currency.normalize(),
            currency: payment.currency.to_string(),
            state: payment.state,
            status: payment.status,
            created_at: payment.created_at,
            block_hash: payment.block_hash,
            received_amount: payment.received_amount,
            confirmed_at: payment.confirmed_at,
            expired_at: payment.expired_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pub currency: String,
    pub price: Decimal,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RecheckResponse {
    pub armed: bool,
}

/// Maps a service error onto an HTTP status.
///
/// Client errors carry their message; everything else is logged here and
/// answered with the bare status text.
pub fn api_error(e: GatewayError) -> poem::Error {
    let status = match &e {
        GatewayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        GatewayError::NotFound => StatusCode::NOT_FOUND,
        GatewayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        GatewayError::Conflict(_) | GatewayError::StorageFailure(_) | GatewayError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_client_error() {
        return poem::Error::from_string(e.to_string(), status);
    }
    error!(error = %e, status = status.as_u16(), "request failed");
    poem::Error::from_status(status)
}
