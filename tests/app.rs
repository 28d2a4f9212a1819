#![cfg(feature = "web")]

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use insight::access::AccessCodes;
use insight::app::{AppState, router};
use insight::generator::{GenerateError, ReportGenerator};
use insight::mailer::{MailError, ReportSender};
use insight::session::Stage;

const BOUNDARY: &str = "insight-test-boundary";
const CSV: &str = "标题,点赞数,链接\nFirst post,1.2万,http://a\nSecond,300,http://b\nThird,800,http://c\n";

struct FakeGenerator {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ReportGenerator for FakeGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(prompt.contains("First post"));
        if self.fail {
            Err(GenerateError::Unavailable { attempts: 3 })
        } else {
            Ok("## Persona Audit\n<b>bold</b> claims".to_string())
        }
    }
}

#[derive(Default)]
struct FakeSender {
    sent: Mutex<Vec<String>>,
}

impl ReportSender for FakeSender {
    fn send_report(&self, to_email: &str, _report: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(to_email.to_string());
        Ok(())
    }
}

/// Rejects every message the way an SMTP relay refusing the recipient would
struct RejectingSender;

impl ReportSender for RejectingSender {
    fn send_report(&self, to_email: &str, _report: &str) -> Result<(), MailError> {
        let err = format!("{}@@", to_email).parse::<lettre::Address>().unwrap_err();
        Err(MailError::Address(err))
    }
}

struct Harness {
    app: Router,
    state: Arc<AppState>,
    generator: Arc<FakeGenerator>,
    sender: Arc<FakeSender>,
}

fn harness(fail: bool, with_mail: bool) -> Harness {
    let sender = Arc::new(FakeSender::default());
    let mailer: Option<Arc<dyn ReportSender>> = if with_mail {
        Some(sender.clone() as Arc<dyn ReportSender>)
    } else {
        None
    };
    harness_with(fail, mailer, sender)
}

fn harness_with(
    fail: bool,
    mailer: Option<Arc<dyn ReportSender>>,
    sender: Arc<FakeSender>,
) -> Harness {
    let generator = Arc::new(FakeGenerator {
        calls: AtomicUsize::new(0),
        fail,
    });

    let state = Arc::new(
        AppState::new(
            AccessCodes::from_config("VIP001,VIP002", Some("letmein")),
            generator.clone(),
            mailer,
            1024 * 1024,
        )
        .unwrap(),
    );

    Harness {
        app: router(state.clone()),
        state,
        generator,
        sender,
    }
}

fn multipart(code: &str, email: &str, csv: Option<&str>) -> String {
    let mut body = String::new();
    for (name, value) in [("code", code), ("email", email)] {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            BOUNDARY, name, value
        ));
    }
    if let Some(csv) = csv {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"export.csv\"\r\nContent-Type: text/csv\r\n\r\n{}\r\n",
            BOUNDARY, csv
        ));
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));
    body
}

fn analyze_request(body: String, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/analyze")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

fn session_cookie(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("session cookie")
        .to_string()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn index_shows_form_and_sets_cookie() {
    let h = harness(false, true);
    let response = h
        .app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cookie(&response).starts_with("session="));
    let html = body_text(response).await;
    assert!(html.contains("action=\"/analyze\""));
    assert!(!html.contains("Download Markdown"));
}

#[tokio::test]
async fn valid_code_produces_report_download_and_email() {
    let h = harness(false, true);

    let response = h
        .app
        .clone()
        .oneshot(analyze_request(
            multipart(" VIP002 ", "user@example.com", Some(CSV)),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response);
    let html = body_text(response).await;

    assert!(html.contains("## Persona Audit"));
    assert!(html.contains("&lt;b&gt;bold&lt;/b&gt;"));
    assert!(html.contains("Download Markdown"));
    assert!(html.contains("emailed to user@example.com"));
    // median of [300, 800, 12000]
    assert!(html.contains("<b>800</b>"));
    // 12000 / 13100 of all likes
    assert!(html.contains("<b>92%</b>"));
    assert!(html.contains("Stability<b>moderate</b>"));
    assert!(html.contains("Sample size 3 posts"));
    assert!(html.contains("High Performers"));
    assert!(html.contains("First post</a> · 12000 likes (row 1)"));
    assert!(html.contains("<td>Third</td>"));
    assert!(!html.contains("more records"));
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*h.sender.sent.lock().unwrap(), vec!["user@example.com"]);

    let download = h
        .app
        .clone()
        .oneshot(
            Request::get("/report.md")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    let disposition = download
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"report-"));
    assert!(disposition.ends_with(".md\""));
    assert_eq!(
        body_text(download).await,
        "## Persona Audit\n<b>bold</b> claims"
    );

    let reset = h
        .app
        .clone()
        .oneshot(
            Request::post("/reset")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(reset.status(), StatusCode::SEE_OTHER);

    let gone = h
        .app
        .oneshot(
            Request::get("/report.md")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_code_is_rejected_without_generation() {
    let h = harness(false, true);
    let response = h
        .app
        .oneshot(analyze_request(
            multipart("vip001", "user@example.com", Some(CSV)),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let html = body_text(response).await;
    assert!(html.contains("Invalid access code."));
    assert!(html.contains("value=\"user@example.com\""));
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_fields_produce_a_warning() {
    let h = harness(false, true);
    let response = h
        .app
        .oneshot(analyze_request(multipart("VIP001", "", None), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("Please fill in"));
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreadable_csv_is_reported() {
    let h = harness(false, true);
    let response = h
        .app
        .oneshot(analyze_request(
            multipart("VIP001", "user@example.com", Some("title,likes\n")),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(response).await.contains("Could not read the CSV"));
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn generation_failure_keeps_the_form() {
    let h = harness(true, true);
    let response = h
        .app
        .oneshot(analyze_request(
            multipart("VIP001", "user@example.com", Some(CSV)),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let html = body_text(response).await;
    assert!(html.contains("still unavailable after 3 attempts"));
    assert!(html.contains("action=\"/analyze\""));
    assert!(h.sender.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn report_survives_missing_mailer() {
    let h = harness(false, false);
    let response = h
        .app
        .oneshot(analyze_request(
            multipart("VIP001", "user@example.com", Some(CSV)),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("## Persona Audit"));
    assert!(html.contains("email could not be sent"));
}

#[tokio::test]
async fn mail_failure_keeps_report_and_warns() {
    let h = harness_with(
        false,
        Some(Arc::new(RejectingSender) as Arc<dyn ReportSender>),
        Arc::new(FakeSender::default()),
    );
    let response = h
        .app
        .oneshot(analyze_request(
            multipart("VIP001", "user@example.com", Some(CSV)),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response);
    let html = body_text(response).await;
    assert!(html.contains("## Persona Audit"));
    assert!(html.contains("notice warning"));
    assert!(html.contains("email could not be sent"));
    assert!(html.contains("Download Markdown"));

    let session_id = cookie.trim_start_matches("session=");
    match h.state.sessions().stage(session_id) {
        Some(Stage::AnalysisComplete {
            email, email_sent, ..
        }) => {
            assert_eq!(email, "user@example.com");
            assert!(!email_sent);
        }
        other => panic!("unexpected stage: {:?}", other),
    }
}

#[tokio::test]
async fn long_exports_show_a_capped_preview() {
    let mut csv = String::from("title,likes\nFirst post,100\n");
    for i in 2..=60 {
        csv.push_str(&format!("Post {},{}\n", i, i * 10));
    }

    let h = harness(false, true);
    let response = h
        .app
        .oneshot(analyze_request(
            multipart("VIP001", "user@example.com", Some(&csv)),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("Sample size 60 posts"));
    assert!(html.contains("<td>Post 50</td>"));
    assert!(!html.contains("<td>Post 51</td>"));
    assert!(html.contains("... And 10 more records"));
}

#[tokio::test]
async fn admin_password_unlocks_code_generation() {
    let h = harness(false, true);

    let response = h
        .app
        .clone()
        .oneshot(analyze_request(multipart("letmein", "", None), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response);
    assert!(body_text(response).await.contains("Access code generator"));

    let response = h
        .app
        .clone()
        .oneshot(
            Request::post("/admin/codes")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("count=3&length=6&prefix=VIP-"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("3 new codes"));
    assert_eq!(html.matches("<li><code>VIP-").count(), 3);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn code_generation_requires_admin_session() {
    let h = harness(false, true);
    let response = h
        .app
        .oneshot(
            Request::post("/admin/codes")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("count=3"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.headers().get(header::LOCATION).unwrap();
    assert!(location.to_str().unwrap().starts_with("/?error="));
}

#[tokio::test]
async fn cleared_code_fields_use_defaults() {
    let h = harness(false, true);

    let response = h
        .app
        .clone()
        .oneshot(analyze_request(multipart("letmein", "", None), None))
        .await
        .unwrap();
    let cookie = session_cookie(&response);

    let response = h
        .app
        .oneshot(
            Request::post("/admin/codes")
                .header(header::COOKIE, &cookie)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("count=&length=&prefix="))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains("10 new codes"));
    assert_eq!(html.matches("<li><code>").count(), 10);
}
