use crate::application::service::{ManualOverride, PaymentRequest, PaymentService};
use crate::domain::payment::Currency;
use crate::error::GatewayError;
use crate::interfaces::http::response::{
    PaymentResponse, PriceResponse, RecheckResponse, VersionResponse, api_error,
};
use futures::{SinkExt, StreamExt};
use poem::web::websocket::{Message, WebSocket};
use poem::web::{Data, Form, Json, Query};
use poem::{IntoResponse, handler};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

type Service = Arc<PaymentService>;

#[derive(Deserialize)]
pub struct PayForm {
    amount: String,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    token: String,
}

#[derive(Deserialize)]
pub struct PriceQuery {
    #[serde(default)]
    currency: String,
}

#[derive(Deserialize)]
pub struct AccountQuery {
    account: String,
}

#[derive(Deserialize)]
pub struct OverrideQuery {
    account: String,
    status: String,
}

fn require_token(token: &str) -> poem::Result<&str> {
    if token.is_empty() {
        return Err(api_error(GatewayError::invalid("missing token")));
    }
    Ok(token)
}

#[handler]
pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[handler]
pub async fn pay(
    Form(form): Form<PayForm>,
    Data(service): Data<&Service>,
) -> poem::Result<Json<PaymentResponse>> {
    let amount = Decimal::from_str(form.amount.trim())
        .map_err(|_| api_error(GatewayError::invalid("invalid amount")))?;
    let request = PaymentRequest {
        amount,
        currency: form.currency,
        state: form.state.unwrap_or_default(),
    };
    let (payment, token) = service.create_payment(request).await.map_err(api_error)?;
    Ok(Json(PaymentResponse::new(payment, Some(token))))
}

#[handler]
pub async fn price(
    Query(query): Query<PriceQuery>,
    Data(service): Data<&Service>,
) -> poem::Result<Json<PriceResponse>> {
    let currency = Currency::parse(&query.currency).map_err(api_error)?;
    let price = service.price(currency.as_str()).await.map_err(api_error)?;
    Ok(Json(PriceResponse {
        currency: currency.to_string(),
        price,
    }))
}

#[handler]
pub async fn verify(
    Query(query): Query<TokenQuery>,
    Data(service): Data<&Service>,
) -> poem::Result<Json<PaymentResponse>> {
    let token = require_token(&query.token)?;
    let payment = service.verify_payment(token).await.map_err(api_error)?;
    Ok(Json(PaymentResponse::new(payment, Some(query.token))))
}

/// Pushes one `PaymentResponse` once the payment confirms, then closes.
///
/// The subscription lives as long as the socket; a client disconnect drops
/// it and unregisters it from the bus.
#[handler]
pub async fn websocket(
    Query(query): Query<TokenQuery>,
    ws: WebSocket,
    Data(service): Data<&Service>,
) -> poem::Result<impl IntoResponse> {
    let token = require_token(&query.token)?.to_string();
    let (mut subscription, snapshot) = service.watch_payment(&token).await.map_err(api_error)?;

    Ok(ws.on_upgrade(move |socket| async move {
        let (mut sink, mut stream) = socket.split();
        let confirmed = if snapshot.is_confirmed() {
            Some(snapshot)
        } else {
            loop {
                tokio::select! {
                    event = subscription.recv() => break event.map(|e| e.payment().clone()),
                    message = stream.next() => match message {
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break None,
                        Some(Ok(_)) => {}
                    },
                }
            }
        };
        let account = subscription.account().clone();
        drop(subscription);

        let Some(payment) = confirmed else {
            debug!(account = %account, "websocket closed before confirmation");
            return;
        };
        let response = PaymentResponse::new(payment, Some(token));
        match serde_json::to_string(&response) {
            Ok(body) => {
                if let Err(e) = sink.send(Message::Text(body)).await {
                    debug!(account = %account, error = %e, "websocket send failed");
                }
            }
            Err(e) => debug!(account = %account, error = %e, "could not encode payment"),
        }
        let _ = sink.close().await;
    }))
}

#[handler]
pub async fn admin_active(Data(service): Data<&Service>) -> poem::Result<Json<Vec<PaymentResponse>>> {
    let mut payments = service.list_active().await.map_err(api_error)?;
    payments.sort_by_key(|p| p.index);
    Ok(Json(
        payments
            .into_iter()
            .map(|p| PaymentResponse::new(p, None))
            .collect(),
    ))
}

#[handler]
pub async fn admin_payment(
    Query(query): Query<AccountQuery>,
    Data(service): Data<&Service>,
) -> poem::Result<Json<PaymentResponse>> {
    let payment = service.admin_payment(&query.account).await.map_err(api_error)?;
    Ok(Json(PaymentResponse::new(payment, None)))
}

#[handler]
pub async fn admin_check(
    Query(query): Query<AccountQuery>,
    Data(service): Data<&Service>,
) -> poem::Result<Json<RecheckResponse>> {
    let armed = service.recheck(&query.account).await.map_err(api_error)?;
    Ok(Json(RecheckResponse { armed }))
}

#[handler]
pub async fn admin_override(
    Query(query): Query<OverrideQuery>,
    Data(service): Data<&Service>,
) -> poem::Result<Json<PaymentResponse>> {
    let status = match query.status.as_str() {
        "confirmed" => ManualOverride::Confirmed,
        "expired" => ManualOverride::Expired,
        other => {
            return Err(api_error(GatewayError::invalid(format!(
                "unknown status: {other}"
            ))));
        }
    };
    let payment = service
        .override_status(&query.account, status)
        .await
        .map_err(api_error)?;
    Ok(Json(PaymentResponse::new(payment, None)))
}
