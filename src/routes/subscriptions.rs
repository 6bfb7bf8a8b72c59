//! Subscription read endpoints. Subscriptions are keyed by owning user, not
//! by the account that happened to surface them, so this is the user's full
//! ledger surfaced under the account a request asked about.

use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_okapi::openapi;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::mail::MailStore;
use crate::models::{DataResponse, SubscriptionSummary};

/// List every subscription detected across the authenticated user's
/// accounts, most recently detected first.
#[openapi(tag = "Subscriptions")]
#[get("/accounts/<account_id>/subscriptions")]
pub async fn list_subscriptions(
    user: AuthUser,
    store: &State<MailStore>,
    account_id: Uuid,
) -> Result<Json<DataResponse<Vec<SubscriptionSummary>>>, ApiError> {
    let account = store.get_account(account_id).await?;
    if account.user_id != user.id {
        return Err(ApiError::NotFound("Resource not found".to_string()));
    }

    let subscriptions = store.list_subscriptions_for_user(user.id).await?;
    let summaries = subscriptions.into_iter().map(SubscriptionSummary::from).collect();
    Ok(Json(DataResponse::new(summaries)))
}
