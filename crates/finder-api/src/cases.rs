use axum::{
    Json,
    extract::{Path, Query, State},
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use finder_db::models::{CaseFilter, CaseRow};
use finder_types::api::CaseQuery;
use finder_types::models::{
    Case, CaseRecord, CaseStats, CaseStatus, Contact, Gender, StatusFilter,
};

use crate::error::ApiError;
use crate::{AppState, run_db};

/// GET /cases: all cases newest first, optionally narrowed by `status`
/// (`all` | `missing` | `found`) and a free-text `q` matched against name,
/// last-seen location and description.
pub async fn list_cases(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<CaseQuery>, ApiError>,
) -> Result<Json<Vec<CaseRecord>>, ApiError> {
    let status: StatusFilter = query
        .status
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e| ApiError::bad_request(format!("Invalid status filter: {}", e)))?;

    let filter = CaseFilter {
        status: status.status(),
        term: query.q.filter(|q| !q.trim().is_empty()),
    };
    debug!("Case search: {:?}", filter);

    let rows = run_db(&state, move |db| db.search_cases(&filter)).await?;
    Ok(Json(rows.into_iter().map(case_record_from_row).collect()))
}

/// GET /cases/{case_id}
pub async fn get_case(
    State(state): State<AppState>,
    WithRejection(Path(case_id), _): WithRejection<Path<String>, ApiError>,
) -> Result<Json<CaseRecord>, ApiError> {
    let case_id: Uuid = case_id
        .parse()
        .map_err(|_| ApiError::bad_request("Case id must be a UUID"))?;

    let id = case_id.to_string();
    let row = run_db(&state, move |db| db.get_case(&id))
        .await?
        .ok_or(ApiError::NotFound("Case"))?;

    Ok(Json(case_record_from_row(row)))
}

/// GET /cases/stats
pub async fn case_stats(State(state): State<AppState>) -> Result<Json<CaseStats>, ApiError> {
    let (missing, found) = run_db(&state, |db| db.count_cases_by_status()).await?;
    Ok(Json(CaseStats {
        missing,
        found,
        total: missing + found,
    }))
}

/// Convert a stored row to its API shape. Corrupt columns are logged and
/// replaced with defaults rather than failing the whole listing.
pub fn case_record_from_row(row: CaseRow) -> CaseRecord {
    let case = Case {
        id: parse_uuid(&row.id, "id", &row.id),
        reporter_id: parse_uuid(&row.reporter_id, "reporter_id", &row.id),
        age: u32::try_from(row.age).unwrap_or_else(|_| {
            warn!("Corrupt age {} on case '{}'", row.age, row.id);
            0
        }),
        gender: row.gender.parse().unwrap_or_else(|e| {
            warn!("Corrupt gender on case '{}': {}", row.id, e);
            Gender::Other
        }),
        status: row.status.parse().unwrap_or_else(|e| {
            warn!("Corrupt status on case '{}': {}", row.id, e);
            CaseStatus::Missing
        }),
        last_seen_date: NaiveDate::parse_from_str(&row.last_seen_date, "%Y-%m-%d")
            .unwrap_or_else(|e| {
                warn!(
                    "Corrupt last_seen_date '{}' on case '{}': {}",
                    row.last_seen_date, row.id, e
                );
                NaiveDate::default()
            }),
        created_at: parse_timestamp(&row.created_at).unwrap_or_else(|| {
            warn!("Corrupt created_at '{}' on case '{}'", row.created_at, row.id);
            DateTime::default()
        }),
        name: row.name,
        height_cm: row.height_cm,
        weight_kg: row.weight_kg,
        hair_color: row.hair_color,
        eye_color: row.eye_color,
        last_seen_location: row.last_seen_location,
        description: row.description,
        photo_url: row.photo_url,
    };

    let contact = row.contact.map(|c| Contact {
        contact_name: c.contact_name,
        relationship: c.relationship,
        phone: c.phone,
        email: c.email,
    });

    CaseRecord { case, contact }
}

fn parse_uuid(value: &str, column: &str, case_id: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on case '{}': {}", column, value, case_id, e);
        Uuid::default()
    })
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Plain SQLite datetime('now') has no timezone; it is UTC.
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .ok()
}
