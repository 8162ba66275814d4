//! HTTP and websocket transport over [`PaymentService`].
//!
//! Every route is a thin translation between query or form fields and a
//! service call. Admin routes are only mounted when a password is
//! configured and are guarded by HTTP Basic auth with the user `admin`.

pub mod handlers;
pub mod response;

use crate::application::service::PaymentService;
use poem::http::StatusCode;
use poem::middleware::Cors;
use poem::web::headers::authorization::Basic;
use poem::web::headers::{Authorization, HeaderMapExt};
use poem::{Endpoint, EndpointExt, Route, get, post};
use std::sync::Arc;
use tracing::warn;

pub const ADMIN_USER: &str = "admin";

/// Builds the gateway's route table.
pub fn routes(service: Arc<PaymentService>, admin_password: Option<String>) -> impl Endpoint {
    let mut app = Route::new()
        .at("/version", get(handlers::version))
        .at("/api/pay", post(handlers::pay))
        .at("/api/price", get(handlers::price))
        .at("/api/verify", get(handlers::verify))
        .at("/websocket", get(handlers::websocket));
    if let Some(password) = admin_password {
        app = app.nest("/admin", admin_routes(password));
    }
    app.with(Cors::new()).data(service)
}

fn admin_routes(password: String) -> impl Endpoint {
    let password = Arc::new(password);
    Route::new()
        .at("/payments/active", get(handlers::admin_active))
        .at("/payment", get(handlers::admin_payment))
        .at("/check", post(handlers::admin_check))
        .at("/override", post(handlers::admin_override))
        .around(move |ep, req| {
            let password = password.clone();
            async move {
                let authorized = req
                    .headers()
                    .typed_get::<Authorization<Basic>>()
                    .is_some_and(|auth| {
                        auth.username() == ADMIN_USER && auth.password() == password.as_str()
                    });
                if !authorized {
                    warn!(path = %req.uri().path(), "rejected admin request");
                    return Err(poem::Error::from_status(StatusCode::UNAUTHORIZED));
                }
                ep.call(req).await
            }
        })
}
