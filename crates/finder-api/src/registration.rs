//! Case registration: multipart form in, photo upload, then the case and
//! its contact written together.

use axum::{
    Extension, Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::{StatusCode, header},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use finder_db::models::{NewCase, NewContact};
use finder_types::api::Claims;
use finder_types::models::{Contact, Gender};

use crate::cases::case_record_from_row;
use crate::error::ApiError;
use crate::{AppState, run_db};

const MAX_AGE: u32 = 150;

/// Raw form input, as submitted. Every field is optional until validated.
#[derive(Debug, Default)]
pub struct RegistrationForm {
    pub name: Option<String>,
    pub age: Option<String>,
    pub gender: Option<String>,
    pub height_cm: Option<String>,
    pub weight_kg: Option<String>,
    pub hair_color: Option<String>,
    pub eye_color: Option<String>,
    pub last_seen_date: Option<String>,
    pub last_seen_location: Option<String>,
    pub description: Option<String>,
    pub contact_name: Option<String>,
    pub relationship: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub photo: Option<PhotoUpload>,
}

#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A form that passed validation.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub age: u32,
    pub gender: Gender,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub hair_color: String,
    pub eye_color: String,
    pub last_seen_date: NaiveDate,
    pub last_seen_location: String,
    pub description: String,
    pub contact: Contact,
    pub photo: PhotoUpload,
}

impl RegistrationForm {
    /// Drain a multipart body. The photo is read incrementally and refused
    /// as soon as it passes `max_photo_bytes`.
    pub async fn read(mut multipart: Multipart, max_photo_bytes: usize) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
            let field_name = field.name().unwrap_or_default().to_string();

            if field_name == "photo" {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let mut bytes = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    if bytes.len() + chunk.len() > max_photo_bytes {
                        warn!("Photo upload exceeded {} bytes, rejecting", max_photo_bytes);
                        return Err(ApiError::PayloadTooLarge(format!(
                            "Photo exceeds the maximum size of {} bytes",
                            max_photo_bytes
                        )));
                    }
                    bytes.extend_from_slice(&chunk);
                }
                form.photo = Some(PhotoUpload {
                    file_name,
                    content_type,
                    bytes,
                });
                continue;
            }

            let value = field.text().await.map_err(multipart_error)?;
            if !form.set_text(&field_name, value) {
                debug!("Ignoring unknown registration field '{}'", field_name);
            }
        }

        Ok(form)
    }

    fn set_text(&mut self, field: &str, value: String) -> bool {
        let slot = match field {
            "name" => &mut self.name,
            "age" => &mut self.age,
            "gender" => &mut self.gender,
            "height_cm" => &mut self.height_cm,
            "weight_kg" => &mut self.weight_kg,
            "hair_color" => &mut self.hair_color,
            "eye_color" => &mut self.eye_color,
            "last_seen_date" => &mut self.last_seen_date,
            "last_seen_location" => &mut self.last_seen_location,
            "description" => &mut self.description,
            "contact_name" => &mut self.contact_name,
            "relationship" => &mut self.relationship,
            "phone" => &mut self.phone,
            "email" => &mut self.email,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    /// Check every field in form order and report the first problem.
    /// `today` bounds the last-seen date.
    pub fn validate(self, today: NaiveDate) -> Result<Registration, ApiError> {
        let name = required(self.name, "name")?;

        let age = required(self.age, "age")?;
        let age: u32 = age
            .parse()
            .ok()
            .filter(|a| *a <= MAX_AGE)
            .ok_or_else(|| {
                ApiError::bad_request(format!(
                    "age must be a whole number between 0 and {}",
                    MAX_AGE
                ))
            })?;

        let gender: Gender = required(self.gender, "gender")?
            .parse()
            .map_err(|_| ApiError::bad_request("gender must be one of male, female, other"))?;

        let height_cm = positive_number(required(self.height_cm, "height_cm")?, "height_cm")?;
        let weight_kg = positive_number(required(self.weight_kg, "weight_kg")?, "weight_kg")?;
        let hair_color = required(self.hair_color, "hair_color")?;
        let eye_color = required(self.eye_color, "eye_color")?;

        let last_seen_date = parse_date(&required(self.last_seen_date, "last_seen_date")?)?;
        if last_seen_date > today {
            return Err(ApiError::bad_request("last_seen_date cannot be in the future"));
        }

        let last_seen_location = required(self.last_seen_location, "last_seen_location")?;
        let description = required(self.description, "description")?;

        let photo = self
            .photo
            .filter(|p| !p.bytes.is_empty())
            .ok_or_else(|| ApiError::bad_request("photo is required"))?;
        let is_image = photo
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"));
        if !is_image {
            return Err(ApiError::bad_request("photo must be an image file (JPEG, PNG, etc.)"));
        }

        let contact = Contact {
            contact_name: required(self.contact_name, "contact_name")?,
            relationship: required(self.relationship, "relationship")?,
            phone: required(self.phone, "phone")?,
            email: required(self.email, "email")?,
        };
        match contact.email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(ApiError::bad_request("email must be a valid email address")),
        }

        Ok(Registration {
            name,
            age,
            gender,
            height_cm,
            weight_kg,
            hair_color,
            eye_color,
            last_seen_date,
            last_seen_location,
            description,
            contact,
            photo,
        })
    }
}

/// POST /cases: register a missing person (multipart/form-data).
pub async fn register_case(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(multipart, _): WithRejection<Multipart, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let registration = RegistrationForm::read(multipart, state.max_photo_bytes)
        .await?
        .validate(Utc::now().date_naive())
        .inspect_err(|e| warn!("Rejected registration from {}: {}", claims.sub, e))?;

    let photo = state
        .photos
        .put(
            claims.sub,
            registration.photo.file_name.as_deref(),
            registration.photo.content_type.as_deref().unwrap_or_default(),
            &registration.photo.bytes,
        )
        .await
        .map_err(|e| e.context("uploading case photo"))?;

    let case_id = Uuid::new_v4().to_string();
    let contact_id = Uuid::new_v4().to_string();
    let reporter_id = claims.sub.to_string();
    let photo_url = photo.url.clone();
    let cid = case_id.clone();

    let inserted = run_db(&state, move |db| {
        let r = registration;
        db.insert_case_with_contact(
            &NewCase {
                id: &cid,
                reporter_id: &reporter_id,
                name: &r.name,
                age: i64::from(r.age),
                gender: r.gender.as_str(),
                height_cm: r.height_cm,
                weight_kg: r.weight_kg,
                hair_color: &r.hair_color,
                eye_color: &r.eye_color,
                last_seen_date: &r.last_seen_date.format("%Y-%m-%d").to_string(),
                last_seen_location: &r.last_seen_location,
                description: &r.description,
                photo_url: &photo_url,
            },
            &NewContact {
                id: &contact_id,
                contact_name: &r.contact.contact_name,
                relationship: &r.contact.relationship,
                phone: &r.contact.phone,
                email: &r.contact.email,
            },
        )
    })
    .await;

    let outcome = match inserted {
        Ok(Some(row)) => Ok(row),
        // Validly signed token for an account that no longer exists
        Ok(None) => Err(ApiError::Unauthorized),
        Err(err) => Err(err),
    };
    let row = match outcome {
        Ok(row) => row,
        Err(err) => {
            // The rows were rolled back; don't leave the photo behind either
            if let Err(e) = state.photos.delete(&photo.key).await {
                warn!("Failed to remove orphaned photo {}: {}", photo.key, e);
            }
            return Err(err);
        }
    };

    info!("Case {} registered by {}", case_id, claims.sub);

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/cases/{}", case_id))],
        Json(case_record_from_row(row)),
    ))
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{} is required", field)))
}

fn positive_number(value: String, field: &str) -> Result<f64, ApiError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n > 0.0)
        .ok_or_else(|| ApiError::bad_request(format!("{} must be a positive number", field)))
}

/// `YYYY-MM-DD`, or an RFC 3339 timestamp truncated to its date.
fn parse_date(value: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map_err(|_| ApiError::bad_request("last_seen_date must be a date (YYYY-MM-DD)"))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::bad_request(format!("Invalid form data: {}", err.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn complete_form() -> RegistrationForm {
        let mut form = RegistrationForm::default();
        for (field, value) in SAMPLE_FIELDS {
            assert!(form.set_text(field, value.to_string()));
        }
        form.photo = Some(PhotoUpload {
            file_name: Some("photo.jpg".into()),
            content_type: Some("image/jpeg".into()),
            bytes: b"\xFF\xD8\xFF\xE0".to_vec(),
        });
        form
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn rejection(form: RegistrationForm) -> String {
        match form.validate(today()) {
            Err(ApiError::BadRequest(message)) => message,
            other => panic!("expected a bad request, got {:?}", other.map(|r| r.name)),
        }
    }

    #[test]
    fn complete_form_validates() {
        let registration = complete_form().validate(today()).unwrap();
        assert_eq!(registration.age, 28);
        assert_eq!(registration.gender, Gender::Female);
        assert_eq!(registration.last_seen_date, NaiveDate::from_ymd_opt(2023, 11, 2).unwrap());
        assert_eq!(registration.contact.relationship, "Sister");
    }

    #[test]
    fn each_required_field_is_enforced() {
        for (field, _) in SAMPLE_FIELDS {
            let mut form = complete_form();
            form.set_text(field, "   ".into());
            assert_eq!(rejection(form), format!("{} is required", field));
        }
    }

    #[test]
    fn missing_date_and_photo_are_rejected() {
        let mut form = complete_form();
        form.last_seen_date = None;
        assert_eq!(rejection(form), "last_seen_date is required");

        let mut form = complete_form();
        form.photo = None;
        assert_eq!(rejection(form), "photo is required");

        let mut form = complete_form();
        form.photo.as_mut().unwrap().bytes.clear();
        assert_eq!(rejection(form), "photo is required");
    }

    #[test]
    fn field_formats_are_checked() {
        let mut form = complete_form();
        form.age = Some("twenty".into());
        assert!(rejection(form).starts_with("age must be"));

        let mut form = complete_form();
        form.age = Some("151".into());
        assert!(rejection(form).starts_with("age must be"));

        let mut form = complete_form();
        form.gender = Some("unknown".into());
        assert!(rejection(form).starts_with("gender must be"));

        let mut form = complete_form();
        form.height_cm = Some("-4".into());
        assert_eq!(rejection(form), "height_cm must be a positive number");

        let mut form = complete_form();
        form.last_seen_date = Some("2024-06-02".into());
        assert_eq!(rejection(form), "last_seen_date cannot be in the future");

        let mut form = complete_form();
        form.last_seen_date = Some("02/11/2023".into());
        assert!(rejection(form).starts_with("last_seen_date must be"));

        let mut form = complete_form();
        form.email = Some("not-an-email".into());
        assert!(rejection(form).starts_with("email must be"));

        let mut form = complete_form();
        form.photo.as_mut().unwrap().content_type = Some("application/pdf".into());
        assert!(rejection(form).starts_with("photo must be an image"));
    }

    #[test]
    fn rfc3339_dates_are_truncated() {
        let mut form = complete_form();
        form.last_seen_date = Some("2023-11-02T18:30:00.000Z".into());
        let registration = form.validate(today()).unwrap();
        assert_eq!(registration.last_seen_date, NaiveDate::from_ymd_opt(2023, 11, 2).unwrap());
    }

    #[tokio::test]
    async fn registration_requires_authentication() {
        let state = test_state().await;
        let response =
            send(&state, multipart_request(None, SAMPLE_FIELDS, Some(SAMPLE_PHOTO))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.db.count_cases_by_status().unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn successful_registration_creates_case_and_contact() {
        let state = test_state().await;
        let (user_id, token) = signed_up(&state, "reg@example.com").await;

        let response = send(
            &state,
            multipart_request(Some(token.as_str()), SAMPLE_FIELDS, Some(SAMPLE_PHOTO)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
        let body = body_json(response).await;

        let case_id = body["id"].as_str().unwrap();
        assert_eq!(location, format!("/cases/{}", case_id));
        assert_eq!(body["status"], "missing");
        assert_eq!(body["reporter_id"], user_id.as_str());
        assert_eq!(body["contact"]["email"], "jane@example.com");

        // Photo stored under the reporter's namespace
        let photo_url = body["photo_url"].as_str().unwrap();
        assert!(photo_url.starts_with(&format!("http://localhost:3000/photos/{}/", user_id)));
        assert!(photo_url.ends_with(".jpg"));

        let (cases, contacts): (i64, i64) = state
            .db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM cases),
                            (SELECT COUNT(*) FROM contacts WHERE case_id = ?1)",
                    [case_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?)
            })
            .unwrap();
        assert_eq!((cases, contacts), (1, 1));
        assert_eq!(state.db.count_cases_by_status().unwrap(), (1, 0));
    }

    #[tokio::test]
    async fn missing_photo_writes_nothing() {
        let state = test_state().await;
        let (_, token) = signed_up(&state, "nophoto@example.com").await;

        let response =
            send(&state, multipart_request(Some(token.as_str()), SAMPLE_FIELDS, None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "photo is required");
        assert_eq!(state.db.count_cases_by_status().unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn non_multipart_body_gets_error_body() {
        let state = test_state().await;
        let (_, token) = signed_up(&state, "json@example.com").await;

        let mut request = json_request("POST", "/cases", serde_json::json!({ "name": "Emma" }));
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, format!("Bearer {}", token).parse().unwrap());
        let response = send(&state, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
        assert_eq!(state.db.count_cases_by_status().unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn unknown_reporter_is_unauthorized_and_photo_removed() {
        let state = test_state().await;
        let ghost = Uuid::new_v4();
        let token = crate::auth::create_token(
            TEST_SECRET,
            ghost,
            "ghost@example.com",
            chrono::Duration::hours(1),
        )
        .unwrap();

        let response = send(
            &state,
            multipart_request(Some(token.as_str()), SAMPLE_FIELDS, Some(SAMPLE_PHOTO)),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "Authentication required");
        assert_eq!(state.db.count_cases_by_status().unwrap(), (0, 0));

        let left_behind = std::fs::read_dir(state.photos.user_dir(ghost))
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(left_behind, 0);
    }

    #[tokio::test]
    async fn oversized_photo_is_rejected() {
        let mut state = test_state().await;
        std::sync::Arc::get_mut(&mut state).unwrap().max_photo_bytes = 16;
        let (_, token) = signed_up(&state, "big@example.com").await;

        let big = vec![0u8; 64];
        let response = send(
            &state,
            multipart_request(
                Some(token.as_str()),
                SAMPLE_FIELDS,
                Some(("big.png", "image/png", big.as_slice())),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(state.db.count_cases_by_status().unwrap(), (0, 0));
    }
}
