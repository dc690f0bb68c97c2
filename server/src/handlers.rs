#![allow(clippy::unused_async)]
use crate::auth::AuthUser;
use crate::domain::{FileRecord, NewFile, Storage};
use crate::error::ApiError;
use crate::file_reply::FileReply;
use crate::sqlite::{Mode, Sqlite};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, TryStreamExt};
use futures_util::StreamExt;
use kernel::{ErrorBody, FileList, Message, UploadReceipt};
use std::fmt::Display;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

use axum::{
    extract::{Multipart, Path},
    http::StatusCode,
};

/// Multipart body of an upload.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    /// File content, sent with its file name
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

/// Stores a single file for the caller.
#[utoipa::path(
    post,
    path = "/api/files/upload",
    tag = "files",
    security(("bearer_auth" = [])),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "File stored", body = UploadReceipt),
        (status = 400, description = "No file in the form", body = ErrorBody),
        (status = 401, description = "Authentication failed", body = ErrorBody),
        (status = 403, description = "File count limit reached", body = ErrorBody),
        (status = 413, description = "Storage limit exceeded", body = ErrorBody),
    ),
)]
pub async fn upload_file(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ApiError::BadRequest("File name is required".to_owned()))?
            .to_owned();
        let content_type = field
            .content_type()
            .filter(|c| !c.is_empty())
            .map_or_else(
                || {
                    mime_guess::from_path(&file_name)
                        .first_or_octet_stream()
                        .to_string()
                },
                str::to_owned,
            );
        let (data, read_bytes) = read_from_stream(field)
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        let result = execute(&state.db, Mode::ReadWrite, |mut repository| {
            repository.insert_file(&NewFile {
                uid: &user.uid,
                name: &file_name,
                content_type: &content_type,
                data: &data,
            })
        });
        let record = log_file_operation_result(result, &file_name, read_bytes as u64)?;
        let receipt = UploadReceipt {
            message: "File uploaded successfully".to_owned(),
            download_url: state.config.content_url(&record.id),
            file_id: record.id,
        };
        return Ok(created(Json(receipt)));
    }
    Err(ApiError::BadRequest("No file provided".to_owned()))
}

/// Lists the caller's files, newest first.
#[utoipa::path(
    get,
    path = "/api/files/list",
    tag = "files",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller's files", body = FileList),
        (status = 401, description = "Authentication failed", body = ErrorBody),
    ),
)]
pub async fn list_files(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<FileList>, ApiError> {
    let records = execute(&state.db, Mode::ReadOnly, |repository| {
        repository.list_files(&user.uid)
    })?;
    let files: Vec<_> = records
        .into_iter()
        .map(|r| r.into_metadata(&state.config))
        .collect();
    Ok(Json(FileList {
        total_count: files.len(),
        files,
    }))
}

/// Downloads file content. The URL is public so a browser can follow it.
#[utoipa::path(
    get,
    path = "/api/files/content/{id}",
    tag = "files",
    responses(
        (status = 200, response = FileReply),
        (status = 404, description = "File not found", body = ErrorBody),
    ),
    params(
        ("id" = String, Path, description = "File id")
    ),
)]
pub async fn get_file_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<FileReply, ApiError> {
    execute(&state.db, Mode::ReadOnly, |repository| {
        let file = repository
            .get_file(&id)?
            .ok_or_else(|| ApiError::not_found("File"))?;
        let capacity = usize::try_from(file.size).unwrap_or_default();
        let mut data = Vec::with_capacity(capacity);
        repository
            .get_file_data(&file.blake3_hash)?
            .read_to_end(&mut data)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        tracing::info!("file {id} read: {} bytes", data.len());
        Ok(FileReply::new(data, file.name, file.content_type))
    })
}

/// Deletes one of the caller's files.
#[utoipa::path(
    delete,
    path = "/api/files/delete/{id}",
    tag = "files",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "File deleted", body = Message),
        (status = 403, description = "File belongs to another user", body = ErrorBody),
        (status = 404, description = "File not found", body = ErrorBody),
    ),
    params(
        ("id" = String, Path, description = "File id")
    ),
)]
pub async fn delete_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    let deleted = execute(&state.db, Mode::ReadWrite, |mut repository| {
        let file = repository
            .get_file(&id)?
            .ok_or_else(|| ApiError::not_found("File"))?;
        if file.uid != user.uid {
            return Err(ApiError::Forbidden("Access denied".to_owned()));
        }
        repository.delete_file(&id)
    })?;
    tracing::info!(
        "file {id} deleted: files {} blobs {}",
        deleted.files,
        deleted.blobs
    );
    Ok(Json(Message::new("File deleted successfully")))
}

/// Opens the database for a single request and runs the action on it.
pub(crate) fn execute<F, R>(db: &Arc<PathBuf>, mode: Mode, action: F) -> Result<R, ApiError>
where
    F: FnOnce(Sqlite) -> Result<R, ApiError>,
{
    let start = Instant::now();
    match Sqlite::open(db.as_path(), mode) {
        Ok(s) => {
            let res = action(s);
            let duration = start.elapsed();
            tracing::debug!("DB query time: {:?}", duration);
            res
        }
        Err(e) => {
            tracing::error!("{e}");
            Err(e)
        }
    }
}

fn log_file_operation_result<E: Display>(
    operation_result: Result<FileRecord, E>,
    file_name: &str,
    read_bytes: u64,
) -> Result<FileRecord, E> {
    match &operation_result {
        Ok(record) => {
            tracing::info!(
                "file: {} read: {} file id: {}",
                file_name,
                read_bytes,
                record.id
            );
        }
        Err(e) => {
            tracing::warn!("file '{}' not stored. Error: {}", file_name, e);
        }
    }
    operation_result
}

pub(crate) fn created<S: IntoResponse>(s: S) -> (StatusCode, Response) {
    (StatusCode::CREATED, s.into_response())
}

async fn read_from_stream<S, E>(stream: S) -> io::Result<(Vec<u8>, usize)>
where
    S: Stream<Item = Result<Bytes, E>> + StreamExt,
    E: Sync + std::error::Error + Send + 'static,
{
    // Convert the stream into an `AsyncRead`.
    let body_with_io_error = stream.map_err(io::Error::other);
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);
    let mut buffer = Vec::new();

    let copied_bytes = tokio::io::copy(&mut body_reader, &mut buffer).await?;
    let copied_bytes = usize::try_from(copied_bytes).unwrap_or(usize::MAX);
    Ok((buffer, copied_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&["a", "bc"], 3)]
    #[case(&[], 0)]
    #[trace]
    #[tokio::test]
    async fn read_from_stream_tests(#[case] chunks: &[&'static str], #[case] expected: usize) {
        // Arrange
        let items: Vec<Result<Bytes, io::Error>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        let stream = futures::stream::iter(items);

        // Act
        let (data, read) = read_from_stream(stream).await.unwrap();

        // Assert
        assert_eq!(read, expected);
        assert_eq!(data.len(), expected);
    }
}
