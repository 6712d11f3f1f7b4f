use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use veil_api::middleware::require_auth;
use veil_api::moderation::ModerationClient;
use veil_api::notify::Notifier;
use veil_api::sms::{SmsClient, SmsConfig};
use veil_api::state::{AppState, AppStateInner};
use veil_api::{auth, blocks, bootstrap, conversations, share, sms_webhook};
use veil_gateway::connection;
use veil_gateway::dispatcher::Dispatcher;
use veil_sequencer::handler::SequencerContext;
use veil_sequencer::queue::SpecialQueue;

/// Seconds between polls of the sequencer job table.
const WORKER_POLL_INTERVAL_SECS: u64 = 1;
/// Seconds between sweeps of expired KV entries.
const KV_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "veil=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("VEIL_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let task_secret =
        std::env::var("VEIL_TASK_SECRET").unwrap_or_else(|_| "dev-task-secret".into());
    let db_path = std::env::var("VEIL_DB_PATH").unwrap_or_else(|_| "veil.db".into());
    let host = std::env::var("VEIL_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("VEIL_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let invite_link_base =
        std::env::var("VEIL_INVITE_LINK_BASE").unwrap_or_else(|_| "http://localhost:3000".into());

    // Init database
    let db = Arc::new(veil_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let kv = veil_kv::TtlStore::new();
    let queue = SpecialQueue::new(db.clone());

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        kv: kv.clone(),
        dispatcher: dispatcher.clone(),
        queue: queue.clone(),
        moderation: ModerationClient::new(std::env::var("VEIL_MODERATION_API_KEY").ok()),
        sms: SmsClient::new(sms_config_from_env()),
        notifier: Notifier::new(std::env::var("VEIL_NOTIFY_WEBHOOK_URL").ok()),
        jwt_secret: jwt_secret.clone(),
    });

    // Background loops: sequencer worker and KV expiry sweep
    let sequencer_ctx = SequencerContext {
        db,
        dispatcher: dispatcher.clone(),
        invite_link_base,
    };
    tokio::spawn(veil_sequencer::queue::run_worker_loop(
        queue.clone(),
        sequencer_ctx,
        WORKER_POLL_INTERVAL_SECS,
    ));
    tokio::spawn(veil_kv::run_sweep_loop(kv, KV_SWEEP_INTERVAL_SECS));

    // Routes
    let public_routes = Router::new()
        .route("/otp/send", post(auth::send_otp))
        .route("/users", post(auth::create_user))
        .route("/share/{slug}", get(share::get_share))
        .route("/sms/inbound", post(sms_webhook::inbound_sms))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/state", get(bootstrap::get_state))
        .route("/conversations", post(conversations::create_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            post(conversations::send_message),
        )
        .route(
            "/conversations/{conversation_id}/read",
            post(conversations::read_conversation),
        )
        .route("/blocks/{user_id}", post(blocks::block))
        .route("/blocks/{user_id}", delete(blocks::unblock))
        .route("/typing", post(conversations::typing))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new().route("/gateway", get(ws_upgrade)).with_state(ServerState {
        dispatcher,
        jwt_secret,
    });

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(veil_sequencer::webhook::router(queue, task_secret))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Veil server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// SMS delivery is only wired up when every provider variable is set.
fn sms_config_from_env() -> Option<SmsConfig> {
    Some(SmsConfig {
        space_url: std::env::var("VEIL_SMS_SPACE_URL").ok()?,
        project_id: std::env::var("VEIL_SMS_PROJECT_ID").ok()?,
        api_token: std::env::var("VEIL_SMS_API_TOKEN").ok()?,
        from_number: std::env::var("VEIL_SMS_FROM_NUMBER").ok()?,
    })
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.jwt_secret)
    })
}
