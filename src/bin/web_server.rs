//! # Submission Web Server
//!
//! HTTP producer adapter for the validation queue. Users post codes directly,
//! chat bridges post raw messages to be scanned, and operators trigger group
//! runs. Also runs the periodic validation sweep.
//!
//! ## Routes
//!
//! | Method | Path                        | Purpose                            |
//! |--------|-----------------------------|------------------------------------|
//! | POST   | `/api/codes`                | queue a submitted code             |
//! | POST   | `/api/messages`             | scan a chat message for a code     |
//! | GET    | `/api/queue`                | queue length and contents          |
//! | POST   | `/api/groups/:id/redeem`    | start a group run in the background |
//! | POST   | `/api/classify`             | run the CAPTCHA model on an image  |
//! | GET    | `/api/events`               | recent notifier history            |
//! | GET    | `/api/health`               | liveness plus limiter usage        |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use giftcode_redeemer::api::client::decode_image;
use giftcode_redeemer::common::config::{load_config, AppConfig};
use giftcode_redeemer::common::logging::init_logger;
use giftcode_redeemer::common::messages::{CodeSource, GroupId};
use giftcode_redeemer::validation::extract_code;
use giftcode_redeemer::Service;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (TOML format)
    #[arg(short, long, default_value = "config/redeemer.toml")]
    config: String,
}

#[derive(Deserialize)]
struct CodeRequest {
    code: String,
    #[serde(default)]
    reply_to: Option<String>,
}

#[derive(Deserialize)]
struct MessageRequest {
    content: String,
    #[serde(default)]
    reply_to: Option<String>,
}

#[derive(Deserialize)]
struct RedeemRequest {
    code: String,
}

#[derive(Deserialize)]
struct ClassifyRequest {
    /// Base64 image, with or without a `data:image/...;base64,` prefix
    image_base64: String,
}

#[derive(Serialize)]
struct ClassifyResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    confidence: f32,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

fn reject(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let config: AppConfig = load_config(&args.config)?;
    let addr = config.web.address.clone();

    info!("🚀 Initializing web server...");
    let service = Arc::new(Service::open(config).await?);

    let app = Router::new()
        .route("/api/codes", post(submit_code))
        .route("/api/messages", post(scan_message))
        .route("/api/queue", get(queue_status))
        .route("/api/groups/:id/redeem", post(redeem_group))
        .route("/api/classify", post(classify_image))
        .route("/api/events", get(recent_events))
        .route("/api/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(service.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🌐 Web server running on http://{}", addr);
    info!("📡 Submit codes at http://{}/api/codes", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("❌ Web server terminated: {}", e);
            }
        }
        _ = service.run() => {}
    }

    Ok(())
}

async fn health_check(State(service): State<Arc<Service>>) -> impl IntoResponse {
    let usage = service.limiter.usage().await;
    Json(serde_json::json!({
        "status": "ok",
        "service": "giftcode-redeemer",
        "solver": service.classifier.is_available(),
        "solver_stats": service.classifier.stats(),
        "rate_limit": usage,
    }))
}

async fn submit_code(
    State(service): State<Arc<Service>>,
    Json(request): Json<CodeRequest>,
) -> impl IntoResponse {
    let response = service
        .queue
        .enqueue(&request.code, CodeSource::Submission, request.reply_to)
        .await;
    Json(response)
}

async fn scan_message(
    State(service): State<Arc<Service>>,
    Json(request): Json<MessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let code = extract_code(&request.content)
        .ok_or_else(|| reject(StatusCode::UNPROCESSABLE_ENTITY, "no code found in message"))?;

    info!("💬 Found candidate '{}' in a message", code);
    let response = service
        .queue
        .enqueue(&code, CodeSource::Scan, request.reply_to)
        .await;
    Ok(Json(response))
}

async fn queue_status(State(service): State<Arc<Service>>) -> impl IntoResponse {
    Json(service.queue.status().await)
}

async fn redeem_group(
    State(service): State<Arc<Service>>,
    Path(group): Path<GroupId>,
    Json(request): Json<RedeemRequest>,
) -> ApiResult<impl IntoResponse> {
    if service.orchestrator.is_running(group) {
        return Err(reject(
            StatusCode::CONFLICT,
            format!("a redemption run for group {} is already in progress", group),
        ));
    }

    let orchestrator = service.orchestrator.clone();
    let code = request.code.clone();
    tokio::spawn(async move {
        match orchestrator.run(group, &code).await {
            Ok(report) => info!(
                "🏁 Run {} finished: {} succeeded, {} failed",
                report.run, report.counts.success, report.counts.failed
            ),
            Err(e) => error!("❌ Run for group {} did not start: {}", group, e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "group": group, "code": request.code, "started": true })),
    ))
}

async fn classify_image(
    State(service): State<Arc<Service>>,
    Json(request): Json<ClassifyRequest>,
) -> ApiResult<impl IntoResponse> {
    let bytes = decode_image(&request.image_base64)
        .map_err(|e| reject(StatusCode::BAD_REQUEST, e.to_string()))?;

    if !service.classifier.is_available() {
        return Err(reject(
            StatusCode::SERVICE_UNAVAILABLE,
            "CAPTCHA solver is not loaded",
        ));
    }

    let result = service.classifier.classify(bytes).await;
    Ok(Json(ClassifyResponse {
        ok: result.ok,
        code: result.code,
        confidence: result.confidence,
    }))
}

async fn recent_events(State(service): State<Arc<Service>>) -> impl IntoResponse {
    Json(service.notifier.events().await)
}
