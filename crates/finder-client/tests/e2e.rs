use std::sync::Arc;

use chrono::NaiveDate;
use finder_api::storage::PhotoStore;
use finder_api::{AppStateInner, matching};
use finder_client::{CaseForm, ClientError, FinderClient, Photo};
use finder_db::Database;
use finder_types::models::{CaseStatus, Contact, Gender, StatusFilter};
use reqwest::StatusCode;

/// Serve the full router on a loopback port and return its base URL.
async fn spawn_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let db = Database::open_in_memory().unwrap();
    let dir = std::env::temp_dir().join(format!("finder_e2e_{}", uuid::Uuid::new_v4()));
    let photos = PhotoStore::new(dir, base_url.clone()).await.unwrap();
    let state = Arc::new(AppStateInner::new(db, "e2e-secret".into(), photos));

    tokio::spawn(async move {
        axum::serve(listener, finder_api::router(state)).await.unwrap();
    });
    base_url
}

fn photo() -> Photo {
    Photo {
        file_name: "portrait.png".into(),
        content_type: "image/png".into(),
        bytes: b"\x89PNG\r\n\x1a\nnot really a png".to_vec(),
    }
}

fn form(name: &str) -> CaseForm {
    CaseForm {
        name: name.into(),
        age: 17,
        gender: Gender::Male,
        height_cm: 172.5,
        weight_kg: 61.0,
        hair_color: "black".into(),
        eye_color: "brown".into(),
        last_seen_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        last_seen_location: "Lucknow railway station".into(),
        description: "Blue school uniform".into(),
        contact: Contact {
            contact_name: "Ravi Kumar".into(),
            relationship: "Father".into(),
            phone: "+91 98765 43210".into(),
            email: "ravi@example.com".into(),
        },
        photo: photo(),
    }
}

#[tokio::test]
async fn reporter_registers_and_public_finds_case() {
    let base_url = spawn_server().await;
    let mut reporter = FinderClient::new(&base_url);

    let account = reporter.register("reporter@example.com", "secret1", "Ravi Kumar").await.unwrap();
    let session = reporter.session().await.unwrap();
    assert_eq!(session.user_id, account.user_id);

    let created = reporter.register_case(form("Arjun Kumar")).await.unwrap();
    assert_eq!(created.case.status, CaseStatus::Missing);
    assert_eq!(created.case.reporter_id, account.user_id);
    assert_eq!(created.contact.as_ref().unwrap().relationship, "Father");
    assert!(created.case.photo_url.starts_with(&format!("{}/photos/", base_url)));

    // Photo is publicly fetchable at the URL stored on the case
    let served = reqwest::get(&created.case.photo_url).await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.bytes().await.unwrap().as_ref(), photo().bytes.as_slice());

    let public = FinderClient::new(&base_url);
    let hits = public.list_cases("lucknow", StatusFilter::All).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].case.id, created.case.id);

    let none = public
        .list_cases("arjun", StatusFilter::Only(CaseStatus::Found))
        .await
        .unwrap();
    assert!(none.is_empty());

    let detail = public.get_case(created.case.id).await.unwrap();
    assert_eq!(detail, created);

    let stats = public.stats().await.unwrap();
    assert_eq!((stats.missing, stats.found, stats.total), (1, 0, 1));
}

#[tokio::test]
async fn anonymous_match_stays_within_bounds() {
    let base_url = spawn_server().await;
    let mut reporter = FinderClient::new(&base_url);
    reporter.register("m@example.com", "secret1", "Reporter").await.unwrap();
    for name in ["One", "Two", "Three"] {
        reporter.register_case(form(name)).await.unwrap();
    }

    let public = FinderClient::new(&base_url);
    for _ in 0..10 {
        let matches = public.match_photo(&photo()).await.unwrap();
        assert!(matches.len() <= matching::MAX_MATCHES);
        for m in &matches {
            assert!((matching::MIN_CONFIDENCE..=matching::MAX_CONFIDENCE).contains(&m.confidence));
            assert_eq!(m.case.status, CaseStatus::Missing);
        }
    }
}

#[tokio::test]
async fn errors_surface_status_and_message() {
    let base_url = spawn_server().await;
    let mut client = FinderClient::new(&base_url);

    assert!(matches!(client.session().await, Err(ClientError::NotSignedIn)));
    assert!(matches!(client.register_case(form("Nobody")).await, Err(ClientError::NotSignedIn)));

    client.register("dup@example.com", "secret1", "First").await.unwrap();
    let err = client.register("dup@example.com", "secret1", "Second").await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::CONFLICT));

    let err = client.login("dup@example.com", "wrong-password").await.unwrap_err();
    match err {
        ClientError::Api { status, message, .. } => {
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert!(!message.is_empty());
        }
        other => panic!("expected an API error, got {other:?}"),
    }

    let err = client.get_case(uuid::Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));

    let mut bad = form("Bad Photo");
    bad.photo.content_type = "text/plain".into();
    client.login("dup@example.com", "secret1").await.unwrap();
    let err = client.register_case(bad).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    assert!(client.list_cases("", StatusFilter::All).await.unwrap().is_empty());
}
