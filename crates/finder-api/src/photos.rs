use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tokio_util::io::ReaderStream;

use crate::AppState;
use crate::error::ApiError;
use crate::storage::content_type_for;

/// GET /photos/{user_id}/{file_name}: streams a stored photo back.
pub async fn serve_photo(
    State(state): State<AppState>,
    WithRejection(Path((user_id, file_name)), _): WithRejection<
        Path<(String, String)>,
        ApiError,
    >,
) -> Result<impl IntoResponse, ApiError> {
    let path = state
        .photos
        .resolve(&user_id, &file_name)
        .ok_or(ApiError::NotFound("Photo"))?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("Photo"));
        }
        Err(e) => {
            let err = anyhow::Error::from(e).context(format!("opening {}", path.display()));
            return Err(err.into());
        }
    };
    let size = file.metadata().await.map_err(anyhow::Error::from)?.len();

    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&file_name).to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    ))
}
