use kernel::AuthSession;

use crate::download::Delivery;
use crate::error::ClientError;
use crate::prompt::Prompt;
use crate::resource::Resource;
use crate::service::CheckoutService;

pub const DEFAULT_ORIGIN: &str = "http://localhost:5173";
pub const ORIGIN_ENV: &str = "SIMSYNC_ORIGIN";

const CHECKOUT_UNAVAILABLE: &str = "Payments are currently being set up. Please check back soon or contact support for manual upgrade.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// The user was sent to the hosted checkout page
    Navigated(String),
    /// No browser; the URL is left for the user to open
    Pending(String),
}

/// Redirect targets the payment processor sends the user back to.
pub fn redirect_targets(origin: &str) -> Result<(String, String), ClientError> {
    let mut success = Resource::parse(origin)?;
    success.append_path("dashboard").append_query("payment", "success");
    let mut cancel = Resource::parse(origin)?;
    cancel.append_path("premium").append_query("payment", "cancelled");
    Ok((success.to_string(), cancel.to_string()))
}

/// Asks the backend for a hosted checkout session and navigates to it.
pub async fn upgrade<S: CheckoutService + ?Sized>(
    service: &S,
    session: &AuthSession,
    origin: &str,
    prompt: &dyn Prompt,
    delivery: &dyn Delivery,
) -> Result<CheckoutOutcome, ClientError> {
    let (success_url, cancel_url) = redirect_targets(origin)?;
    let checkout = match service
        .create_checkout_session(&session.uid, &success_url, &cancel_url)
        .await
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to create checkout session: {e}");
            prompt.alert(CHECKOUT_UNAVAILABLE);
            return Err(e);
        }
    };

    tracing::info!("checkout session created for {}", session.uid);
    if delivery.open(&checkout.url).await {
        Ok(CheckoutOutcome::Navigated(checkout.url))
    } else {
        prompt.alert(&format!("Open this page to complete the upgrade:\n{}", checkout.url));
        Ok(CheckoutOutcome::Pending(checkout.url))
    }
}
