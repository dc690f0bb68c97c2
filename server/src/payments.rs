#![allow(clippy::unused_async)]
use axum::extract::State;
use axum::Json;
use kernel::{CheckoutEvent, CheckoutRequest, CheckoutSession, ErrorBody, Tier};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::domain::Storage;
use crate::error::ApiError;
use crate::handlers::execute;
use crate::sqlite::Mode;
use crate::AppState;

const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Webhook acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookStatus {
    pub status: String,
}

/// Hosted checkout URL carrying the buyer and the return URLs as query parameters.
fn checkout_link(base: &str, request: &CheckoutRequest) -> Result<String, ApiError> {
    let mut url = Url::parse(base)
        .map_err(|e| ApiError::Internal(format!("Invalid checkout URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_reference_id", &request.user_id)
        .append_pair("success_url", &request.success_url)
        .append_pair("cancel_url", &request.cancel_url);
    Ok(url.into())
}

/// Starts a premium subscription purchase.
#[utoipa::path(
    post,
    path = "/api/payments/create-checkout-session",
    tag = "payments",
    security(("bearer_auth" = [])),
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Hosted checkout to navigate to", body = CheckoutSession),
        (status = 403, description = "Purchase for another user", body = ErrorBody),
        (status = 500, description = "Payment processing not configured", body = ErrorBody),
    ),
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutSession>, ApiError> {
    if request.user_id != user.uid {
        return Err(ApiError::Forbidden("Access denied".to_owned()));
    }
    let Some(base) = state.config.checkout_url.as_deref() else {
        return Err(ApiError::Internal(
            "Payment processing not configured".to_owned(),
        ));
    };
    let url = checkout_link(base, &request)?;
    tracing::info!("checkout session created for {}", user.uid);
    Ok(Json(CheckoutSession { url }))
}

/// Payment processor notification. A completed checkout upgrades the buyer.
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    tag = "payments",
    request_body = CheckoutEvent,
    responses(
        (status = 200, description = "Event processed", body = WebhookStatus),
    ),
)]
pub async fn webhook(
    State(state): State<AppState>,
    Json(event): Json<CheckoutEvent>,
) -> Result<Json<WebhookStatus>, ApiError> {
    if event.kind == CHECKOUT_COMPLETED {
        if let Some(uid) = event.data.object.client_reference_id.as_deref() {
            let upgraded = execute(&state.db, Mode::ReadWrite, |mut repository| {
                repository.set_tier(uid, Tier::Premium)
            })?;
            if upgraded {
                tracing::info!("payment successful, {uid} upgraded to premium");
            } else {
                tracing::warn!("payment for unknown user {uid}");
            }
        }
    } else {
        tracing::debug!("ignored payment event {}", event.kind);
    }
    Ok(Json(WebhookStatus {
        status: "success".to_owned(),
    }))
}
