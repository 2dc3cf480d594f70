//! Photo matching.
//!
//! The shipped matcher does not look at the image at all: it picks up to two
//! `missing` cases at random and attaches a fabricated confidence score.
//! [`CaseMatcher`] is the seam where a real face-comparison backend would go.

use axum::{Extension, Json, extract::State};
use axum_extra::extract::WithRejection;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::Rng;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::info;

use finder_db::models::CaseFilter;
use finder_types::api::{FaceMatchRequest, FaceMatchResponse};
use finder_types::models::{Case, CaseStatus, MatchCandidate};

use crate::cases::case_record_from_row;
use crate::error::ApiError;
use crate::middleware::Viewer;
use crate::{AppState, run_db};

/// Most candidates a single search returns.
pub const MAX_MATCHES: usize = 2;
pub const MIN_CONFIDENCE: u8 = 70;
pub const MAX_CONFIDENCE: u8 = 99;

/// A decoded image submitted for matching.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    /// Media type from a `data:` URL; `None` for bare base64.
    pub media_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImagePayloadError {
    #[error("Image data is required")]
    Missing,
    #[error("Expected an image but got '{0}'")]
    NotAnImage(String),
    #[error("Image data is not valid base64")]
    InvalidEncoding,
}

impl ImagePayload {
    /// Accepts a `data:image/...;base64,...` URL or bare base64.
    pub fn parse(input: &str) -> Result<Self, ImagePayloadError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ImagePayloadError::Missing);
        }

        let (media_type, encoded) = match input.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) =
                    rest.split_once(',').ok_or(ImagePayloadError::InvalidEncoding)?;
                let mut parts = header.split(';');
                let media_type = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
                if !media_type.starts_with("image/") {
                    return Err(ImagePayloadError::NotAnImage(media_type));
                }
                if !parts.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
                    return Err(ImagePayloadError::InvalidEncoding);
                }
                (Some(media_type), data)
            }
            None => (None, input),
        };

        let bytes = B64.decode(encoded.trim()).map_err(|_| ImagePayloadError::InvalidEncoding)?;
        if bytes.is_empty() {
            return Err(ImagePayloadError::Missing);
        }

        Ok(Self { media_type, bytes })
    }
}

impl From<ImagePayloadError> for ApiError {
    fn from(err: ImagePayloadError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

/// Picks match candidates for an image out of the `missing` cases.
pub trait CaseMatcher: Send + Sync {
    fn find_matches(&self, image: &ImagePayload, candidates: Vec<Case>) -> Vec<MatchCandidate>;
}

/// Placeholder matcher: random picks with random confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomMatcher;

impl CaseMatcher for RandomMatcher {
    fn find_matches(&self, _image: &ImagePayload, candidates: Vec<Case>) -> Vec<MatchCandidate> {
        simulate_matches(&mut rand::rng(), candidates)
    }
}

/// Take a uniformly random count in `0..=MAX_MATCHES` of shuffled
/// candidates, give each a confidence in `MIN_CONFIDENCE..=MAX_CONFIDENCE`,
/// and order them by confidence, highest first.
pub fn simulate_matches<R: Rng + ?Sized>(
    rng: &mut R,
    mut candidates: Vec<Case>,
) -> Vec<MatchCandidate> {
    let count = rng.random_range(0..=MAX_MATCHES);
    if count == 0 || candidates.is_empty() {
        return Vec::new();
    }

    candidates.shuffle(rng);
    candidates.truncate(count);

    let mut matches: Vec<MatchCandidate> = candidates
        .into_iter()
        .map(|case| MatchCandidate {
            case,
            confidence: rng.random_range(MIN_CONFIDENCE..=MAX_CONFIDENCE),
        })
        .collect();
    matches.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    matches
}

/// POST /face-match: `{ imageBase64 }` to `{ matches }`.
pub async fn face_match(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    WithRejection(Json(req), _): WithRejection<Json<FaceMatchRequest>, ApiError>,
) -> Result<Json<FaceMatchResponse>, ApiError> {
    let image = ImagePayload::parse(req.image_base64.as_deref().unwrap_or_default())?;
    if image.bytes.len() > state.max_photo_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "Photo exceeds the maximum size of {} bytes",
            state.max_photo_bytes
        )));
    }

    let filter = CaseFilter {
        status: Some(CaseStatus::Missing),
        term: None,
    };
    let rows = run_db(&state, move |db| db.search_cases(&filter)).await?;
    info!(
        "Photo match ({} bytes, {}) by {}: {} missing cases on file",
        image.bytes.len(),
        image.media_type.as_deref().unwrap_or("unknown type"),
        viewer.0.as_ref().map(|c| c.sub.to_string()).unwrap_or_else(|| "anonymous".into()),
        rows.len()
    );

    let candidates: Vec<Case> =
        rows.into_iter().map(|row| case_record_from_row(row).case).collect();
    let matches = state.matcher.find_matches(&image, candidates);

    info!("Returning {} potential matches", matches.len());
    Ok(Json(FaceMatchResponse { matches }))
}
