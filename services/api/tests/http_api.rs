//! services/api/tests/http_api.rs
//!
//! Drives the full router over real HTTP, with in-memory stand-ins for the
//! language model and the database.

use api_lib::{adapters::LocalObjectStorage, config::Config, web::build_router, web::AppState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use equation_ace_core::{
    domain::{
        GraphSpec, HistoryRecord, ImageBlob, NewHistoryRecord, ProblemInput, SolverReply, User,
        UserCredentials,
    },
    history::HistoryRecorder,
    pipeline::SolvePipeline,
    ports::{
        DatabaseService, HistoryRepository, PortError, PortResult, ProblemSolvingService,
        TextCorrectionService, TextExtractionService,
    },
};
use reqwest::{header, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

//=========================================================================================
// Fakes
//=========================================================================================

struct ScriptedModel;

#[async_trait]
impl ProblemSolvingService for ScriptedModel {
    async fn solve_problem(&self, input: &ProblemInput) -> PortResult<SolverReply> {
        let statement = match input {
            ProblemInput::Text(text) => text.clone(),
            ProblemInput::Image(_) => "2x = 4".to_string(),
        };
        Ok(SolverReply {
            ocr_text: input.is_image().then(|| statement.clone()),
            corrected_text: statement.clone(),
            solved_result: vec!["Vertex at (0, -5)".to_string()],
            explanation: vec!["The parabola opens upwards.".to_string()],
            graph: Some(GraphSpec::plottable(&statement)),
        })
    }
}

#[async_trait]
impl TextExtractionService for ScriptedModel {
    async fn extract_text(&self, _image: &ImageBlob) -> PortResult<String> {
        Ok("2x = 4".to_string())
    }
}

#[async_trait]
impl TextCorrectionService for ScriptedModel {
    async fn correct_text(&self, raw_text: &str) -> PortResult<String> {
        Ok(raw_text.to_string())
    }
}

#[derive(Default)]
struct MemoryDb {
    users: Mutex<HashMap<String, UserCredentials>>,
    sessions: Mutex<HashMap<String, Uuid>>,
    records: Mutex<Vec<HistoryRecord>>,
}

#[async_trait]
impl DatabaseService for MemoryDb {
    async fn create_user_with_email(&self, email: &str, hashed_password: &str) -> PortResult<User> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(email) {
            return Err(PortError::Conflict(email.to_string()));
        }
        let user_id = Uuid::new_v4();
        users.insert(
            email.to_string(),
            UserCredentials {
                user_id,
                email: email.to_string(),
                hashed_password: hashed_password.to_string(),
            },
        );
        Ok(User {
            user_id,
            email: email.to_string(),
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.users
            .lock()
            .unwrap()
            .get(email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(email.to_string()))
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        self.users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.user_id == user_id)
            .map(|u| User {
                user_id: u.user_id,
                email: u.email.clone(),
            })
            .ok_or_else(|| PortError::NotFound(user_id.to_string()))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        _expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), user_id);
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .copied()
            .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.sessions.lock().unwrap().remove(session_id);
        Ok(())
    }
}

#[async_trait]
impl HistoryRepository for MemoryDb {
    async fn insert_history_record(&self, record: NewHistoryRecord) -> PortResult<HistoryRecord> {
        let saved = HistoryRecord {
            id: record.id,
            owner_id: record.owner_id,
            raw_text: record.raw_text,
            corrected_text: record.corrected_text,
            result_lines: record.result_lines,
            explanation_steps: record.explanation_steps,
            graph: record.graph,
            image_url: record.image_url,
            schema: record.schema,
            created_at: Utc::now(),
        };
        self.records.lock().unwrap().push(saved.clone());
        Ok(saved)
    }

    async fn get_history_for_owner(&self, owner_id: Uuid) -> PortResult<Vec<HistoryRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn get_history_record(&self, record_id: Uuid) -> PortResult<HistoryRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == record_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(record_id.to_string()))
    }
}

//=========================================================================================
// Harness
//=========================================================================================

fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "OPENAI_API_KEY" => Some("sk-test".to_string()),
        "DATABASE_URL" => Some("postgres://unused".to_string()),
        _ => None,
    })
    .unwrap()
}

/// Starts the server on an ephemeral port and returns its base URL.
async fn spawn_app() -> String {
    let config = Arc::new(test_config());
    let model = Arc::new(ScriptedModel);
    let db = Arc::new(MemoryDb::default());
    let storage_root = std::env::temp_dir().join(format!("equation-ace-{}", Uuid::new_v4()));
    let storage = Arc::new(LocalObjectStorage::new(storage_root, "http://localhost"));
    let accounts: Arc<dyn DatabaseService> = db.clone();

    let state = Arc::new(AppState {
        config,
        pipeline: Some(Arc::new(SolvePipeline::new(
            model.clone(),
            model.clone(),
            model,
        ))),
        accounts: Some(accounts),
        history: Some(Arc::new(HistoryRecorder::new(db, storage))),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

/// The `name=value` part of the `Set-Cookie` header.
fn session_cookie(resp: &reqwest::Response) -> String {
    let set_cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

async fn sign_up(client: &reqwest::Client, base: &str, email: &str) -> String {
    let resp = client
        .post(format!("{}/auth/signup", base))
        .json(&json!({"email": email, "password": "correct horse"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    session_cookie(&resp)
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test]
async fn status_reports_configured_features() {
    let base = spawn_app().await;
    let body: Value = reqwest::get(format!("{}/status", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["solverConfigured"], json!(true));
    assert_eq!(body["historyConfigured"], json!(true));
    assert_eq!(body["missingVariables"], json!([]));
    assert_eq!(body["notice"], Value::Null);
}

#[tokio::test]
async fn anonymous_text_solve_returns_result_without_saving() {
    let base = spawn_app().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/solve", base))
        .json(&json!({"problemStatement": "f(x) = x^2 - 5"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["saveStatus"], json!("signInRequired"));
    assert_eq!(body["result"]["rawText"], Value::Null);
    assert_eq!(body["result"]["correctedText"], json!("f(x) = x^2 - 5"));
    assert_eq!(body["result"]["solvedResult"], json!(["Vertex at (0, -5)"]));
    assert_eq!(body["result"]["graphData"]["isPlottable"], json!(true));
    assert_eq!(body["result"]["graphData"]["functionStr"], json!("x^2 - 5"));
}

#[tokio::test]
async fn solve_without_input_is_bad_request() {
    let base = spawn_app().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/solve", base))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn text_and_photo_together_are_rejected() {
    let base = spawn_app().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/solve", base))
        .json(&json!({
            "problemStatement": "2x = 4",
            "photoDataUri": "data:image/png;base64,AAAA"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn graph_endpoint_samples_and_reports_errors() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/graph", base))
        .json(&json!({"expression": "x^2 - 5"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], json!("plot"));
    assert_eq!(body["points"].as_array().unwrap().len(), 401);

    let resp = client
        .post(format!("{}/graph", base))
        .json(&json!({"expression": "x^^2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], json!("error"));
    assert!(body["message"].is_string());
}

fn marked_png() -> Vec<u8> {
    let mut img = image::RgbImage::from_pixel(40, 20, image::Rgb([255, 255, 255]));
    for x in 5..35 {
        img.put_pixel(x, 10, image::Rgb([0, 0, 0]));
    }
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn upload_form(crop: Option<Value>) -> reqwest::multipart::Form {
    let part = reqwest::multipart::Part::bytes(marked_png())
        .file_name("problem.png")
        .mime_str("image/png")
        .unwrap();
    let form = reqwest::multipart::Form::new().part("file", part);
    match crop {
        Some(crop) => form.text("crop", crop.to_string()),
        None => form,
    }
}

#[tokio::test]
async fn uploaded_photo_is_read_and_solved() {
    let base = spawn_app().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/solve/upload", base))
        .multipart(upload_form(None))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["rawText"], json!("2x = 4"));
    assert_eq!(body["result"]["graphData"]["isPlottable"], json!(false));
}

#[tokio::test]
async fn unsupported_upload_type_is_rejected() {
    let base = spawn_app().await;
    let part = reqwest::multipart::Part::bytes(b"GIF89a".to_vec())
        .file_name("problem.gif")
        .mime_str("image/gif")
        .unwrap();
    let form = reqwest::multipart::Form::new().part("file", part);

    let resp = reqwest::Client::new()
        .post(format!("{}/solve/upload", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn crop_part_limits_the_uploaded_area() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();

    // The top-left corner of the photo holds no marks.
    let resp = client
        .post(format!("{}/solve/upload", base))
        .multipart(upload_form(Some(json!({"x": 0, "y": 0, "width": 4, "height": 4}))))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("Could not find any text in the selected area."));

    let resp = client
        .post(format!("{}/solve/upload", base))
        .multipart(upload_form(Some(json!({"x": 0, "y": 5, "width": 40, "height": 10}))))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["rawText"], json!("2x = 4"));
}

#[tokio::test]
async fn crop_past_the_image_edge_is_bad_request() {
    let base = spawn_app().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/solve/upload", base))
        .multipart(upload_form(Some(json!({"x": 40, "y": 0, "width": 5, "height": 5}))))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn drawing_is_rasterized_and_solved() {
    let base = spawn_app().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/solve", base))
        .json(&json!({
            "drawing": {
                "width": 40,
                "height": 30,
                "strokes": [
                    {"mode": "draw", "points": [{"x": 5.0, "y": 15.0}, {"x": 35.0, "y": 15.0}]}
                ]
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["rawText"], json!("2x = 4"));
}

#[tokio::test]
async fn empty_drawing_is_unprocessable() {
    let base = spawn_app().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/solve", base))
        .json(&json!({"drawing": {"width": 40, "height": 30, "strokes": []}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(resp
        .text()
        .await
        .unwrap()
        .contains("The canvas is empty. Please draw an equation."));
}

#[tokio::test]
async fn hostile_graph_expressions_are_unprocessable() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();
    let deep = format!("{}x{}", "(".repeat(200), ")".repeat(200));
    let long = "(".repeat(100_000);

    for expression in [deep, long] {
        let resp = client
            .post(format!("{}/graph", base))
            .json(&json!({"expression": expression}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], json!("error"));
    }
}

#[tokio::test]
async fn history_requires_sign_in() {
    let base = spawn_app().await;
    let resp = reqwest::get(format!("{}/history", base)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn duplicate_signup_is_conflict() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();
    sign_up(&client, &base, "ada@example.com").await;

    let resp = client
        .post(format!("{}/auth/signup", base))
        .json(&json!({"email": "Ada@Example.com", "password": "another"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn signed_in_solve_is_saved_and_exported() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();
    let cookie = sign_up(&client, &base, "grace@example.com").await;

    let me: Value = client
        .get(format!("{}/auth/me", base))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["email"], json!("grace@example.com"));

    let body: Value = client
        .post(format!("{}/solve", base))
        .header(header::COOKIE, &cookie)
        .json(&json!({"problemStatement": "f(x) = x^2 - 5"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["saveStatus"], json!("queued"));

    // Saving runs in the background, so poll until the record shows up.
    let mut records = Vec::new();
    for _ in 0..50 {
        let list: Vec<Value> = client
            .get(format!("{}/history", base))
            .header(header::COOKIE, &cookie)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if !list.is_empty() {
            records = list;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["correctedText"], json!("f(x) = x^2 - 5"));
    assert_eq!(record["imageUrl"], Value::Null);
    assert_eq!(record["schemaVersion"], json!(2));

    let id = record["id"].as_str().unwrap();
    let resp = client
        .get(format!("{}/history/{}/export", base, id))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains(id));
    let text = resp.text().await.unwrap();
    assert!(text.contains("Problem:\nf(x) = x^2 - 5"));
    assert!(text.contains("Vertex at (0, -5)"));
}

#[tokio::test]
async fn another_users_record_is_not_found() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();
    let owner = sign_up(&client, &base, "owner@example.com").await;
    let stranger = sign_up(&client, &base, "stranger@example.com").await;

    client
        .post(format!("{}/solve", base))
        .header(header::COOKIE, &owner)
        .json(&json!({"problemStatement": "y = 3x + 1"}))
        .send()
        .await
        .unwrap();

    let mut id = None;
    for _ in 0..50 {
        let list: Vec<Value> = client
            .get(format!("{}/history", base))
            .header(header::COOKIE, &owner)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if let Some(first) = list.first() {
            id = first["id"].as_str().map(str::to_string);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let id = id.unwrap();

    let resp = client
        .get(format!("{}/history/{}/export", base, id))
        .header(header::COOKIE, &stranger)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let base = spawn_app().await;
    let client = reqwest::Client::new();
    let cookie = sign_up(&client, &base, "linus@example.com").await;

    let resp = client
        .post(format!("{}/auth/logout", base))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .get(format!("{}/history", base))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
