//! Typed HTTP client for the finder server.
//!
//! Wraps every endpoint the browser front end uses: sign-up and sign-in,
//! case search and detail, case registration with a photo, and photo
//! matching.

pub mod error;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::NaiveDate;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use finder_types::api::{
    CaseQuery, ErrorBody, FaceMatchRequest, FaceMatchResponse, LoginRequest, LoginResponse,
    RegisterRequest, RegisterResponse, SessionResponse,
};
use finder_types::models::{CaseRecord, CaseStats, Contact, Gender, MatchCandidate, StatusFilter};
use uuid::Uuid;

pub use crate::error::ClientError;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Everything needed to register a case, minus the reporter (taken from
/// the signed-in session).
#[derive(Debug, Clone)]
pub struct CaseForm {
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
    pub photo: Photo,
}

#[derive(Debug, Clone)]
pub struct Photo {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Photo {
    /// Encode as a `data:` URL, the shape the match endpoint expects.
    pub fn to_data_url(&self) -> String {
        image_data_url(&self.content_type, &self.bytes)
    }
}

pub fn image_data_url(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, B64.encode(bytes))
}

#[derive(Debug, Clone)]
pub struct FinderClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl FinderClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn sign_out(&mut self) {
        self.token = None;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // -- Auth --

    /// Create an account and keep the returned token.
    pub async fn register(
        &mut self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<RegisterResponse> {
        let body = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            full_name: full_name.to_string(),
        };
        let resp: RegisterResponse =
            read_json(self.http.post(self.url("/auth/register")).json(&body).send().await?).await?;
        self.token = Some(resp.token.clone());
        Ok(resp)
    }

    /// Sign in and keep the returned token.
    pub async fn login(&mut self, email: &str, password: &str) -> Result<LoginResponse> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let resp: LoginResponse =
            read_json(self.http.post(self.url("/auth/login")).json(&body).send().await?).await?;
        self.token = Some(resp.token.clone());
        Ok(resp)
    }

    pub async fn session(&self) -> Result<SessionResponse> {
        if self.token.is_none() {
            return Err(ClientError::NotSignedIn);
        }
        let request = self.authorized(self.http.get(self.url("/auth/session")));
        read_json(request.send().await?).await
    }

    // -- Cases --

    /// Search cases. An empty `term` lists everything matching `status`.
    pub async fn list_cases(&self, term: &str, status: StatusFilter) -> Result<Vec<CaseRecord>> {
        let query = CaseQuery {
            q: Some(term.to_string()).filter(|t| !t.trim().is_empty()),
            status: status.status().map(|s| s.to_string()),
        };
        debug!("Listing cases: {:?}", query);
        read_json(self.http.get(self.url("/cases")).query(&query).send().await?).await
    }

    pub async fn get_case(&self, case_id: Uuid) -> Result<CaseRecord> {
        read_json(self.http.get(self.url(&format!("/cases/{}", case_id))).send().await?).await
    }

    pub async fn stats(&self) -> Result<CaseStats> {
        read_json(self.http.get(self.url("/cases/stats")).send().await?).await
    }

    /// Upload a new case with its photo and contact. Requires a session.
    pub async fn register_case(&self, form: CaseForm) -> Result<CaseRecord> {
        if self.token.is_none() {
            return Err(ClientError::NotSignedIn);
        }

        let photo = Part::bytes(form.photo.bytes)
            .file_name(form.photo.file_name)
            .mime_str(&form.photo.content_type)?;

        let multipart = Form::new()
            .text("name", form.name)
            .text("age", form.age.to_string())
            .text("gender", form.gender.to_string())
            .text("height_cm", form.height_cm.to_string())
            .text("weight_kg", form.weight_kg.to_string())
            .text("hair_color", form.hair_color)
            .text("eye_color", form.eye_color)
            .text("last_seen_date", form.last_seen_date.format("%Y-%m-%d").to_string())
            .text("last_seen_location", form.last_seen_location)
            .text("description", form.description)
            .text("contact_name", form.contact.contact_name)
            .text("relationship", form.contact.relationship)
            .text("phone", form.contact.phone)
            .text("email", form.contact.email)
            .part("photo", photo);

        let request = self.authorized(self.http.post(self.url("/cases")).multipart(multipart));
        read_json(request.send().await?).await
    }

    // -- Matching --

    /// Submit a photo for matching. Works signed in or anonymous.
    pub async fn match_photo(&self, photo: &Photo) -> Result<Vec<MatchCandidate>> {
        let body = FaceMatchRequest {
            image_base64: Some(photo.to_data_url()),
        };
        let request = self.authorized(self.http.post(self.url("/face-match")).json(&body));
        let resp: FaceMatchResponse = read_json(request.send().await?).await?;
        Ok(resp.matches)
    }
}

/// Decode a success body, or turn an error response into [`ClientError::Api`].
async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    let (message, details) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error, body.details),
        Err(_) => (text, None),
    };
    Err(ClientError::Api {
        status,
        message,
        details,
    })
}
