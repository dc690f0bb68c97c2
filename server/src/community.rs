#![allow(clippy::unused_async)]
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use kernel::{
    CommunityDownload, CommunityFile, CommunityPage, ErrorBody, Message, RateReceipt,
    RateRequest, ShareReceipt, ShareRequest,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::domain::Storage;
use crate::error::ApiError;
use crate::handlers::{created, execute};
use crate::sqlite::Mode;
use crate::AppState;

const DEFAULT_PAGE: u32 = 50;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// Maximum number of entries, 50 when omitted
    limit: Option<u32>,
    /// Entries to skip
    offset: Option<u32>,
}

fn shared_not_found() -> ApiError {
    ApiError::not_found("Shared file")
}

/// Publishes one of the caller's files.
#[utoipa::path(
    post,
    path = "/api/community/share",
    tag = "community",
    security(("bearer_auth" = [])),
    request_body = ShareRequest,
    responses(
        (status = 201, description = "File shared", body = ShareReceipt),
        (status = 400, description = "File is already shared", body = ErrorBody),
        (status = 403, description = "Not the owner or not a premium user", body = ErrorBody),
        (status = 404, description = "File not found", body = ErrorBody),
    ),
)]
pub async fn share(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<ShareRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = execute(&state.db, Mode::ReadWrite, |mut repository| {
        let file = repository
            .get_file(&request.file_id)?
            .ok_or_else(|| ApiError::not_found("File"))?;
        if file.uid != user.uid {
            return Err(ApiError::Forbidden(
                "You can only share your own files".to_owned(),
            ));
        }
        let owner = repository
            .get_user(&user.uid)?
            .ok_or_else(|| ApiError::not_found("User"))?;
        if !owner.tier.can_share() {
            return Err(ApiError::Forbidden(
                "Sharing to the community is a Premium feature".to_owned(),
            ));
        }
        if repository.is_shared(&file.id, &user.uid)? {
            return Err(ApiError::BadRequest("File is already shared".to_owned()));
        }

        let shared_by = owner.display_name.clone().unwrap_or_else(|| {
            owner
                .email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_owned()
        });
        let entry = CommunityFile {
            id: Uuid::new_v4().to_string(),
            original_file_id: file.id,
            shared_by_uid: user.uid.clone(),
            shared_by,
            name: file.name,
            size: file.size,
            description: request.description.trim().to_owned(),
            downloads: 0,
            average_rating: 0.0,
            rating_count: 0,
            created_at: Utc::now(),
        };
        repository.share_file(&entry)?;
        Ok(ShareReceipt {
            message: "File shared successfully!".to_owned(),
            community_url: format!("/community/{}", entry.id),
            shared_file_id: entry.id,
        })
    })?;
    tracing::info!("user {} shared {}", user.uid, receipt.shared_file_id);
    Ok(created(Json(receipt)))
}

/// Active shared files, newest first.
#[utoipa::path(
    get,
    path = "/api/community/files",
    tag = "community",
    params(PageQuery),
    responses(
        (status = 200, description = "One page of shared files", body = CommunityPage),
    ),
)]
pub async fn files(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<CommunityPage>, ApiError> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE);
    let offset = page.offset.unwrap_or_default();
    let files = execute(&state.db, Mode::ReadOnly, |repository| {
        repository.community_files(limit, offset)
    })?;
    Ok(Json(CommunityPage {
        total: files.len(),
        files,
    }))
}

/// Counts a download and answers where to fetch the content from.
#[utoipa::path(
    post,
    path = "/api/community/{id}/download",
    tag = "community",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Shared file id")
    ),
    responses(
        (status = 200, description = "Download location", body = CommunityDownload),
        (status = 404, description = "Shared file or its content not found", body = ErrorBody),
        (status = 429, description = "Daily download limit reached", body = ErrorBody),
    ),
)]
pub async fn download(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CommunityDownload>, ApiError> {
    let answer = execute(&state.db, Mode::ReadWrite, |mut repository| {
        let shared = repository
            .get_shared(&id)?
            .filter(|s| s.is_active)
            .ok_or_else(shared_not_found)?;
        if repository.get_file(&shared.file.original_file_id)?.is_none() {
            return Err(ApiError::NotFound("File not found in storage".to_owned()));
        }
        let tier = repository
            .get_user(&user.uid)?
            .map(|u| u.tier)
            .unwrap_or_default();
        repository.record_download(
            &id,
            &user.uid,
            Utc::now().date_naive(),
            tier.daily_downloads(),
        )?;
        Ok(CommunityDownload {
            download_url: state.config.content_url(&shared.file.original_file_id),
            file_name: shared.file.name,
            file_size: shared.file.size,
        })
    })?;
    tracing::info!("user {} downloaded shared file {id}", user.uid);
    Ok(Json(answer))
}

/// Rates somebody else's shared file. Rating again replaces the previous one.
#[utoipa::path(
    post,
    path = "/api/community/{id}/rate",
    tag = "community",
    security(("bearer_auth" = [])),
    request_body = RateRequest,
    params(
        ("id" = String, Path, description = "Shared file id")
    ),
    responses(
        (status = 200, description = "Rating stored", body = RateReceipt),
        (status = 400, description = "Rating out of range or own file", body = ErrorBody),
        (status = 404, description = "Shared file not found", body = ErrorBody),
    ),
)]
pub async fn rate(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(request): Json<RateRequest>,
) -> Result<Json<RateReceipt>, ApiError> {
    if !(1..=5).contains(&request.rating) {
        return Err(ApiError::BadRequest(
            "Rating must be between 1 and 5".to_owned(),
        ));
    }
    let totals = execute(&state.db, Mode::ReadWrite, |mut repository| {
        let shared = repository.get_shared(&id)?.ok_or_else(shared_not_found)?;
        if shared.file.shared_by_uid == user.uid {
            return Err(ApiError::BadRequest(
                "You cannot rate your own file".to_owned(),
            ));
        }
        repository.rate(&id, &user.uid, request.rating)
    })?;
    Ok(Json(RateReceipt {
        message: format!("Rated {} stars!", request.rating),
        your_rating: request.rating,
        average_rating: totals.average,
        total_ratings: totals.count,
        previous_rating: totals.previous,
    }))
}

/// Withdraws a shared file. The entry is kept but no longer listed.
#[utoipa::path(
    delete,
    path = "/api/community/{id}",
    tag = "community",
    security(("bearer_auth" = [])),
    params(
        ("id" = String, Path, description = "Shared file id")
    ),
    responses(
        (status = 200, description = "Entry withdrawn", body = Message),
        (status = 403, description = "Not the sharer", body = ErrorBody),
        (status = 404, description = "Shared file not found", body = ErrorBody),
    ),
)]
pub async fn unshare(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    execute(&state.db, Mode::ReadWrite, |mut repository| {
        let shared = repository.get_shared(&id)?.ok_or_else(shared_not_found)?;
        if shared.file.shared_by_uid != user.uid {
            return Err(ApiError::Forbidden(
                "You can only unshare your own files".to_owned(),
            ));
        }
        repository.unshare(&id)
    })?;
    tracing::info!("user {} unshared {id}", user.uid);
    Ok(Json(Message::new("File removed from community sharing")))
}
