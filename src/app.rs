use axum::{
    Form, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use handlebars::Handlebars;
use serde::{Deserialize, Deserializer, Serialize, de};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::access::{self, Access, AccessCodes, DEFAULT_CODE_LENGTH, MAX_BATCH, MAX_CODE_LENGTH};
use crate::config::Config;
use crate::generator::{GeminiClient, ReportGenerator};
use crate::mailer::{self, Mailer, ReportSender};
use crate::posts::{self, Post, Summary};
use crate::prompt;
use crate::session::{SESSION_COOKIE, SessionStore, Stage};

const INDEX_TEMPLATE: &str = "index";

pub struct AppState {
    access: AccessCodes,
    generator: Arc<dyn ReportGenerator>,
    mailer: Option<Arc<dyn ReportSender>>,
    sessions: SessionStore,
    templates: Handlebars<'static>,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        access: AccessCodes,
        generator: Arc<dyn ReportGenerator>,
        mailer: Option<Arc<dyn ReportSender>>,
        max_upload_bytes: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut templates = Handlebars::new();
        templates.register_template_string(INDEX_TEMPLATE, include_str!("./static/index.hbs"))?;

        Ok(AppState {
            access,
            generator,
            mailer,
            sessions: SessionStore::new(),
            templates,
            max_upload_bytes,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
enum NoticeKind {
    Error,
    Warning,
    Success,
}

#[derive(Debug, Serialize)]
struct Notice {
    kind: NoticeKind,
    text: String,
}

impl Notice {
    fn new(kind: NoticeKind, text: impl Into<String>) -> Self {
        Notice {
            kind,
            text: text.into(),
        }
    }
}

#[derive(Serialize)]
struct ReportView<'a> {
    markdown: &'a str,
    analyzed_on: String,
    total_posts: usize,
    median_likes: u64,
    tier: &'static str,
    top_share_percent: u64,
    viral_count: usize,
    stability: &'static str,
    top_posts: &'a [Post],
    preview: &'a [Post],
    /// Rows past the preview, if any
    more_records: Option<usize>,
}

#[derive(Serialize)]
struct AdminView<'a> {
    codes: &'a [String],
    count: usize,
    joined: String,
    max_batch: usize,
    max_length: usize,
}

#[derive(Serialize, Default)]
struct Page<'a> {
    form: bool,
    email: &'a str,
    notice: Option<Notice>,
    report: Option<ReportView<'a>>,
    admin: Option<AdminView<'a>>,
}

impl<'a> Page<'a> {
    fn for_stage(stage: &'a Stage, notice: Option<Notice>, email: &'a str) -> Self {
        match stage {
            Stage::AwaitingAnalysis => Page {
                form: true,
                email,
                notice,
                ..Page::default()
            },
            Stage::AnalysisComplete {
                report,
                summary,
                created_at,
                ..
            } => Page {
                notice,
                report: Some(report_view(report, summary, created_at)),
                ..Page::default()
            },
            Stage::Admin { last_batch } => Page {
                notice,
                admin: Some(AdminView {
                    codes: last_batch,
                    count: last_batch.len(),
                    joined: access::format_batch(last_batch),
                    max_batch: MAX_BATCH,
                    max_length: MAX_CODE_LENGTH,
                }),
                ..Page::default()
            },
        }
    }
}

fn report_view<'a>(
    report: &'a str,
    summary: &'a Summary,
    created_at: &chrono::DateTime<chrono::Local>,
) -> ReportView<'a> {
    let hidden = summary.hidden_rows();
    ReportView {
        markdown: report,
        analyzed_on: created_at.format("%Y-%m-%d").to_string(),
        total_posts: summary.total_posts,
        median_likes: summary.median_likes,
        tier: summary.tier.label(),
        top_share_percent: summary.top_share_percent,
        viral_count: summary.viral_count,
        stability: if summary.is_stable() { "strong" } else { "moderate" },
        top_posts: &summary.top_posts,
        preview: &summary.preview,
        more_records: (hidden > 0).then_some(hidden),
    }
}

#[derive(Debug, Deserialize)]
struct IndexQuery {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodeRequest {
    #[serde(default, deserialize_with = "blank_as_none")]
    count: Option<usize>,
    #[serde(default, deserialize_with = "blank_as_none")]
    length: Option<usize>,
    #[serde(default)]
    prefix: String,
}

/// Browsers submit cleared number inputs as `count=`; treat that as unset
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(de::Error::custom),
    }
}

/// Fields collected from the analysis form
#[derive(Debug, Default)]
struct Submission {
    code: String,
    email: String,
    file: Vec<u8>,
}

/// Build the router around a prepared state
pub fn router(state: Arc<AppState>) -> Router {
    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .route("/", get(serve_index))
        .route("/analyze", post(analyze))
        .route("/report.md", get(download_report))
        .route("/reset", post(reset))
        .route("/admin/codes", post(generate_codes))
        .route("/health", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let generator = GeminiClient::new(config.gemini.clone(), config.retry.clone())?;

    let mailer: Option<Arc<dyn ReportSender>> = match &config.smtp {
        Some(smtp) => Some(Arc::new(Mailer::from_config(smtp)?)),
        None => {
            log::warn!("SMTP is not configured; reports will not be emailed");
            None
        }
    };

    let app_state = Arc::new(AppState::new(
        config.access.clone(),
        Arc::new(generator),
        mailer,
        config.max_upload_bytes,
    )?);

    let app = router(app_state);

    let listener = TcpListener::bind(config.bind_addr).await?;
    log::info!("Listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Look up the visitor's session, creating one (and its cookie) if needed
fn ensure_session(state: &AppState, jar: CookieJar) -> (CookieJar, String, Stage) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let id = cookie.value().to_string();
        if let Some(stage) = state.sessions.stage(&id) {
            return (jar, id, stage);
        }
    }

    let id = state.sessions.create();
    let cookie = Cookie::build((SESSION_COOKIE, id.clone()))
        .path("/")
        .http_only(true);
    (jar.add(cookie), id, Stage::AwaitingAnalysis)
}

fn render(state: &AppState, page: &Page) -> Response {
    match state.templates.render(INDEX_TEMPLATE, page) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            log::error!("template rendering failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Rendering error").into_response()
        }
    }
}

async fn serve_index(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<IndexQuery>,
) -> Response {
    let (jar, _, stage) = ensure_session(&state, jar);
    let notice = query.error.map(|e| Notice::new(NoticeKind::Error, e));
    (jar, render(&state, &Page::for_stage(&stage, notice, ""))).into_response()
}

async fn read_submission(multipart: &mut Multipart) -> Result<Submission, String> {
    let mut submission = Submission::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Upload failed: {}", e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "code" => {
                submission.code = field.text().await.map_err(|e| e.to_string())?;
            }
            "email" => {
                submission.email = field.text().await.map_err(|e| e.to_string())?.trim().to_string();
            }
            "file" => {
                submission.file = field
                    .bytes()
                    .await
                    .map_err(|e| format!("Upload failed: {}", e))?
                    .to_vec();
            }
            _ => {}
        }
    }

    Ok(submission)
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Response {
    let (jar, session_id, stage) = ensure_session(&state, jar);

    let submission = match read_submission(&mut multipart).await {
        Ok(s) => s,
        Err(e) => {
            let page = Page::for_stage(&stage, Some(Notice::new(NoticeKind::Error, e)), "");
            return (StatusCode::BAD_REQUEST, jar, render(&state, &page)).into_response();
        }
    };

    let email = submission.email.as_str();
    let awaiting = Stage::AwaitingAnalysis;
    let form_error = |kind: NoticeKind, text: String| {
        let page = Page::for_stage(&awaiting, Some(Notice::new(kind, text)), email);
        render(&state, &page)
    };

    match state.access.check(&submission.code) {
        Access::Admin => {
            log::info!("admin access granted for session {}", session_id);
            let stage = Stage::Admin {
                last_batch: Vec::new(),
            };
            state.sessions.set_stage(&session_id, stage.clone());
            return (jar, render(&state, &Page::for_stage(&stage, None, ""))).into_response();
        }
        Access::Denied if !submission.code.trim().is_empty() => {
            log::info!("rejected access code for session {}", session_id);
            return (
                StatusCode::FORBIDDEN,
                jar,
                form_error(NoticeKind::Error, "Invalid access code.".to_string()),
            )
                .into_response();
        }
        _ => {}
    }

    if submission.code.trim().is_empty() || email.is_empty() || submission.file.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            jar,
            form_error(
                NoticeKind::Warning,
                "Please fill in the access code, email and CSV file.".to_string(),
            ),
        )
            .into_response();
    }

    if !mailer::looks_like_email(email) {
        return (
            StatusCode::BAD_REQUEST,
            jar,
            form_error(NoticeKind::Warning, format!("'{}' is not a valid email address.", email)),
        )
            .into_response();
    }

    let posts = match posts::parse_csv_bytes(&submission.file) {
        Ok(posts) => posts,
        Err(e) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                jar,
                form_error(NoticeKind::Error, format!("Could not read the CSV: {}", e)),
            )
                .into_response();
        }
    };
    let Some(summary) = posts::summarize(&posts) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            jar,
            form_error(NoticeKind::Error, posts::PostsError::Empty.to_string()),
        )
            .into_response();
    };

    log::info!(
        "generating report for {} posts (median {}, tier {:?})",
        summary.total_posts,
        summary.median_likes,
        summary.tier
    );

    let report = match state.generator.generate(&prompt::build_prompt(&posts)).await {
        Ok(report) => report,
        Err(e) => {
            log::error!("report generation failed: {}", e);
            return (
                StatusCode::BAD_GATEWAY,
                jar,
                form_error(NoticeKind::Error, e.to_string()),
            )
                .into_response();
        }
    };

    // The report is kept before mailing so a mail failure never loses it
    let created_at = chrono::Local::now();
    let complete = |email_sent: bool| Stage::AnalysisComplete {
        report: report.clone(),
        summary: summary.clone(),
        email: email.to_string(),
        email_sent,
        created_at,
    };
    state.sessions.set_stage(&session_id, complete(false));

    let email_sent = send_report(&state, email, &report).await;
    let notice = if email_sent {
        state.sessions.set_stage(&session_id, complete(true));
        Notice::new(
            NoticeKind::Success,
            format!("Analysis complete. A copy was emailed to {}.", email),
        )
    } else {
        Notice::new(
            NoticeKind::Warning,
            "Analysis complete, but the email could not be sent. Download or copy the report below.",
        )
    };

    let stage = complete(email_sent);
    (jar, render(&state, &Page::for_stage(&stage, Some(notice), ""))).into_response()
}

/// Try to mail the report; failures are logged and reported as `false`
async fn send_report(state: &AppState, email: &str, report: &str) -> bool {
    let Some(mailer) = state.mailer.clone() else {
        return false;
    };

    let to = email.to_string();
    let body = report.to_string();
    match tokio::task::spawn_blocking(move || mailer.send_report(&to, &body)).await {
        Ok(Ok(())) => {
            log::info!("report emailed to {}", email);
            true
        }
        Ok(Err(e)) => {
            log::error!("failed to email report to {}: {}", email, e);
            false
        }
        Err(e) => {
            log::error!("mail task panicked: {}", e);
            false
        }
    }
}

async fn download_report(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let stage = jar
        .get(SESSION_COOKIE)
        .and_then(|c| state.sessions.stage(c.value()));

    match stage {
        Some(Stage::AnalysisComplete {
            report, created_at, ..
        }) => {
            let filename = format!("report-{}.md", created_at.format("%Y%m%d-%H%M%S"));
            (
                [
                    (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                report,
            )
                .into_response()
        }
        _ => (StatusCode::NOT_FOUND, "No report available").into_response(),
    }
}

async fn reset(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let (jar, session_id, _) = ensure_session(&state, jar);
    state.sessions.reset(&session_id);
    (jar, Redirect::to("/")).into_response()
}

async fn generate_codes(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(request): Form<CodeRequest>,
) -> Response {
    let (jar, session_id, stage) = ensure_session(&state, jar);

    if !matches!(stage, Stage::Admin { .. }) {
        let target = format!(
            "/?error={}",
            urlencoding::encode("Enter the admin password to generate codes.")
        );
        return (jar, Redirect::to(&target)).into_response();
    }

    let batch = access::generate_codes(
        request.count.unwrap_or(10),
        request.length.unwrap_or(DEFAULT_CODE_LENGTH),
        request.prefix.trim(),
    );
    log::info!("generated {} access codes", batch.len());

    let stage = Stage::Admin { last_batch: batch };
    state.sessions.set_stage(&session_id, stage.clone());
    (jar, render(&state, &Page::for_stage(&stage, None, ""))).into_response()
}
