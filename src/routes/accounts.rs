//! Account read and run-dispatch endpoints. The run-dispatch routes hand off
//! to the [`Supervisor`] and return immediately; they never touch the mail
//! pipeline state themselves.

use rocket::http::Status;
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::mail::{MailStore, Supervisor};
use crate::models::{AccountSummary, DataResponse, RunAccepted};

async fn owned_account(
    store: &MailStore,
    user: &AuthUser,
    account_id: Uuid,
) -> Result<crate::mail::Account, ApiError> {
    let account = store.get_account(account_id).await?;
    if account.user_id != user.id {
        return Err(ApiError::NotFound("Resource not found".to_string()));
    }
    Ok(account)
}

/// Fetch the persisted state of a mailbox account.
#[openapi(tag = "Accounts")]
#[get("/accounts/<account_id>")]
pub async fn get_account(
    user: AuthUser,
    store: &State<MailStore>,
    account_id: Uuid,
) -> Result<Json<DataResponse<AccountSummary>>, ApiError> {
    let account = owned_account(store, &user, account_id).await?;
    Ok(Json(DataResponse::new(AccountSummary::from(account))))
}

/// Dispatch a sync run for this account. Returns immediately; the run
/// itself happens in the background and is reflected in later reads of
/// [`get_account`].
#[openapi(tag = "Accounts")]
#[post("/accounts/<account_id>/sync")]
pub async fn start_sync(
    user: AuthUser,
    store: &State<MailStore>,
    supervisor: &State<Supervisor>,
    account_id: Uuid,
) -> Result<status::Custom<Json<DataResponse<RunAccepted>>>, ApiError> {
    owned_account(store, &user, account_id).await?;
    supervisor.start_sync(account_id);
    Ok(status::Custom(
        Status::Accepted,
        Json(DataResponse::new(RunAccepted {
            account_id,
            accepted: true,
        })),
    ))
}

/// Dispatch a processing run for this account.
#[openapi(tag = "Accounts")]
#[post("/accounts/<account_id>/process")]
pub async fn start_processing(
    user: AuthUser,
    store: &State<MailStore>,
    supervisor: &State<Supervisor>,
    account_id: Uuid,
) -> Result<status::Custom<Json<DataResponse<RunAccepted>>>, ApiError> {
    owned_account(store, &user, account_id).await?;
    supervisor.start_processing(account_id);
    Ok(status::Custom(
        Status::Accepted,
        Json(DataResponse::new(RunAccepted {
            account_id,
            accepted: true,
        })),
    ))
}
