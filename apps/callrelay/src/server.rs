// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use axum::{
    body::Body,
    extract::{
        multipart::MultipartError, ws::WebSocketUpgrade, DefaultBodyLimit, MatchedPath, Multipart,
        Query, State,
    },
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use callrelay_core::{
    classify, ArtifactSource, ArtifactStore, AudioCodec, AuthFailure, CoreError, RawFields,
    StorageFailure, SystemKind, SystemRegistry, Transport,
};
use opentelemetry::{global, KeyValue};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    services::ServeDir,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnFailure, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, error, info, warn};

use crate::broadcaster::Broadcaster;
use crate::config::Config;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::metrics::CallMetrics;
use crate::peerlink::{self, TungsteniteConnector};
use crate::pipeline::{received_at, CallPipeline, Delivery};
use crate::recordings::{self, RecordingsError, RecordingsQuery};
use crate::state::AppState;
use crate::{udp, websocket};

/// Body SDRTrunk expects from a successful connection test.
const CONNECTION_TEST_RESPONSE: &str = "incomplete call data: no talkgroup";
const IMPORTED_RESPONSE: &str = "Call imported successfully.\n";

static HTTP_METRICS: OnceLock<(
    opentelemetry::metrics::Counter<u64>,
    opentelemetry::metrics::Histogram<f64>,
)> = OnceLock::new();

/// Errors that prevent the application from being built.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Registry(#[from] CoreError),

    #[error("failed to set up dispatchers: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

async fn health_handler(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connected_users": app_state.broadcaster.connected_users(),
    }))
}

// --- Call upload ---

/// Form contents of one upload. `audio` is the staged first file part, if any.
#[derive(Debug, Default)]
struct CallForm {
    system: String,
    key: String,
    test: bool,
    fields: RawFields,
    audio: Option<PathBuf>,
    codec: Option<AudioCodec>,
}

impl CallForm {
    async fn discard(mut self) {
        self.discard_staged().await;
    }

    async fn discard_staged(&mut self) {
        if let Some(path) = self.audio.take() {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(path = %path.display(), error = %e, "Failed to remove staged upload");
            }
        }
    }

    fn has_credentials(&self) -> bool {
        !self.system.is_empty() && !self.key.is_empty()
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// SDRTrunk uploads MP3; anything explicitly marked as WAV is stored as such.
fn upload_codec(file_name: Option<&str>, content_type: Option<&str>) -> AudioCodec {
    let is_wav = file_name.is_some_and(|name| name.to_ascii_lowercase().ends_with(".wav"))
        || content_type.is_some_and(|ct| matches!(ct, "audio/wav" | "audio/x-wav" | "audio/wave"));
    if is_wav {
        AudioCodec::Wav
    } else {
        AudioCodec::Mp3
    }
}

/// Reads the whole form. Only the first file part is kept (streamed to staging); later file
/// parts are drained. If credentials precede the first file part and do not authorize, the
/// upload is rejected before anything is written. Connection tests never leave a staged file,
/// whichever side of the file part the `test` field arrives on.
async fn read_call_form(
    registry: &SystemRegistry,
    store: &ArtifactStore,
    mut multipart: Multipart,
) -> Result<CallForm, UploadError> {
    let mut form = CallForm::default();

    let result: Result<(), UploadError> = async {
        while let Some(mut field) = multipart.next_field().await? {
            if field.file_name().is_none() {
                let name = field.name().unwrap_or_default().to_string();
                let value = field.text().await?;
                match name.as_str() {
                    "system" => form.system = value.trim().to_string(),
                    "key" => form.key = value,
                    "test" => {
                        form.test = is_truthy(&value);
                        if form.test {
                            form.discard_staged().await;
                        }
                    },
                    "" => {},
                    _ => {
                        form.fields.insert(name, Value::String(value));
                    },
                }
                continue;
            }

            if form.audio.is_some() || form.test {
                while field.chunk().await?.is_some() {}
                continue;
            }

            if form.has_credentials() {
                registry.authorize(&form.system, &form.key, SystemKind::Sdrtrunk)?;
            }

            let (path, mut file) = store.create_staging_file().await?;
            form.audio = Some(path.clone());
            form.codec = Some(upload_codec(field.file_name(), field.content_type()));

            let stage_err = |source| StorageFailure::Stage { path: path.clone(), source };
            while let Some(chunk) = field.chunk().await? {
                file.write_all(&chunk).await.map_err(stage_err)?;
            }
            file.flush().await.map_err(stage_err)?;
        }
        Ok(())
    }
    .await;

    match result {
        Ok(()) => Ok(form),
        Err(e) => {
            form.discard().await;
            Err(e)
        },
    }
}

async fn call_upload_handler(
    State(app_state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<&'static str, UploadError> {
    let form = read_call_form(&app_state.registry, app_state.pipeline.store(), multipart).await?;

    let system = match app_state.registry.authorize(&form.system, &form.key, SystemKind::Sdrtrunk) {
        Ok(system) => system,
        Err(e) => {
            form.discard().await;
            return Err(e.into());
        },
    };

    if form.test {
        info!(system = %system.alias, "Connection test succeeded");
        form.discard().await;
        return Ok(CONNECTION_TEST_RESPONSE);
    }

    let Some(audio) = form.audio else {
        return Err(UploadError::NoAudio);
    };

    let record = classify(&form.fields, &system.alias, Transport::SdrTrunk, received_at());
    app_state
        .pipeline
        .ingest(
            record,
            ArtifactSource::TempFile(audio),
            form.codec.unwrap_or(AudioCodec::Mp3),
            Delivery::Url,
        )
        .await?;

    Ok(IMPORTED_RESPONSE)
}

// --- Other handlers ---

async fn recordings_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<RecordingsQuery>,
) -> Result<impl IntoResponse, RecordingsError> {
    let entries = recordings::list_recordings(app_state.pipeline.store(), &query).await?;
    Ok(Json(entries))
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| websocket::handle_websocket(socket, app_state))
}

async fn metrics_middleware(req: axum::http::Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.extensions().get::<MatchedPath>().map_or_else(
        || req.uri().path().to_owned(),
        |matched_path| matched_path.as_str().to_owned(),
    );

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let (counter, histogram) = HTTP_METRICS
        .get_or_init(|| {
            let meter = global::meter("callrelay_http");
            (
                meter.u64_counter("http.server.requests").build(),
                meter.f64_histogram("http.server.duration").build(),
            )
        })
        .clone();

    let labels = [
        KeyValue::new("http.method", method.to_string()),
        KeyValue::new("http.route", path),
        KeyValue::new("http.status_code", status),
    ];

    counter.add(1, &labels);
    histogram.record(latency, &labels);

    response
}

/// Creates the application with dispatchers built from configuration.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if the system registry rejects the configured systems, the public path
/// is unusable, or the dispatchers cannot be created.
pub fn create_app(config: Config) -> Result<(Router, Arc<AppState>), StartupError> {
    let dispatcher = Dispatcher::from_config(&config.dispatch)?;
    create_app_with_dispatcher(config, dispatcher)
}

/// Creates the application around an already built [`Dispatcher`].
///
/// # Errors
///
/// Returns an error if the system registry rejects the configured systems or the public path
/// is the site root.
pub fn create_app_with_dispatcher(
    config: Config,
    dispatcher: Dispatcher,
) -> Result<(Router, Arc<AppState>), StartupError> {
    let registry = Arc::new(SystemRegistry::new(config.authorized_systems())?);

    let store =
        ArtifactStore::new(&config.storage.upload_dir).with_public_prefix(&config.server.public_path);
    let public_prefix = store.public_prefix().to_string();
    if public_prefix == "/" {
        return Err(StartupError::Configuration(
            "server.public_path must not be the site root".to_string(),
        ));
    }

    let broadcaster = Broadcaster::default();
    let pipeline = Arc::new(CallPipeline::new(store, broadcaster.clone(), dispatcher));

    let app_state = Arc::new(AppState {
        config: Arc::new(config),
        registry,
        broadcaster,
        pipeline,
    });

    let mut router = Router::new()
        .route("/healthz", get(health_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(websocket_handler))
        .route("/api/recordings", get(recordings_handler))
        .nest_service(&public_prefix, ServeDir::new(&app_state.config.storage.upload_dir));

    if app_state.config.server.call_upload_enabled {
        router = router.route(
            "/api/call-upload",
            post(call_upload_handler)
                .layer(DefaultBodyLimit::max(app_state.config.server.max_body_size)),
        );
    }

    let router = router
        .with_state(Arc::clone(&app_state))
        .layer(ServiceBuilder::new().layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let route = request
                        .extensions()
                        .get::<MatchedPath>()
                        .map_or_else(|| request.uri().path(), |matched| matched.as_str());
                    tracing::info_span!("http_request", http_method = %request.method(), http_route = %route)
                })
                .on_response(DefaultOnResponse::new().level(tracing::Level::DEBUG))
                .on_failure(DefaultOnFailure::new().level(tracing::Level::WARN)),
        ))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            header::HeaderValue::from_static("no-referrer"),
        ));

    Ok((router, app_state))
}

/// Starts the HTTP server together with the UDP receiver and peer links, and runs until a
/// shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the application cannot be built, an address is invalid, or a socket
/// cannot be bound.
///
/// # Panics
///
/// Panics if the process signal handlers cannot be installed.
pub async fn start_server(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let (app, app_state) = create_app(config.clone())?;
    let addr: SocketAddr = config.server.address.parse()?;
    let shutdown = CancellationToken::new();

    if config.udp.enabled {
        let socket = udp::bind(&config.udp.address).await?;
        tokio::spawn(udp::run_udp_receiver(
            socket,
            Arc::clone(&app_state.registry),
            Arc::clone(&app_state.pipeline),
            config.udp.max_datagram_size,
            shutdown.clone(),
        ));
    }

    if config.peerlink.enabled && app_state.registry.peers().next().is_some() {
        peerlink::spawn_peer_links(
            &app_state.registry,
            &config.peerlink,
            Arc::clone(&app_state.pipeline),
            Arc::new(TungsteniteConnector),
            &shutdown,
        );
    }

    #[allow(clippy::expect_used)]
    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {
                info!("Received CTRL-C signal, initiating graceful shutdown");
            },
            () = terminate => {
                info!("Received SIGTERM signal, initiating graceful shutdown");
            },
        }
    };

    info!(address = %addr, "Starting HTTP server");
    let handle = axum_server::Handle::new();

    tokio::spawn({
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal.await;
            shutdown.cancel();
            handle.graceful_shutdown(Some(Duration::from_secs(10)));
        }
    });

    let served = axum_server::bind(addr).handle(handle).serve(app.into_make_service()).await;
    shutdown.cancel();
    served.map_err(|e| {
        error!(error = %e, "HTTP server error");
        e.into()
    })
}

// --- Error responses ---

#[derive(Debug)]
enum UploadError {
    Unauthorized,
    NoAudio,
    Multipart(MultipartError),
    Storage(StorageFailure),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => {
                CallMetrics::shared().call_rejected(Transport::SdrTrunk, "unauthorized");
                (StatusCode::UNAUTHORIZED, AuthFailure.to_string()).into_response()
            },
            Self::NoAudio => {
                CallMetrics::shared().call_rejected(Transport::SdrTrunk, "no_audio");
                (StatusCode::BAD_REQUEST, "incomplete call data: no audio").into_response()
            },
            Self::Multipart(err) => {
                CallMetrics::shared().call_rejected(Transport::SdrTrunk, "malformed");
                warn!(error = %err, "Invalid call upload");
                (err.status(), format!("Invalid multipart payload: {}", err.body_text()))
                    .into_response()
            },
            // Logged and counted where it happened.
            Self::Storage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store call audio").into_response()
            },
        }
    }
}

impl From<AuthFailure> for UploadError {
    fn from(_: AuthFailure) -> Self {
        Self::Unauthorized
    }
}
impl From<MultipartError> for UploadError {
    fn from(err: MultipartError) -> Self {
        Self::Multipart(err)
    }
}
impl From<StorageFailure> for UploadError {
    fn from(err: StorageFailure) -> Self {
        Self::Storage(err)
    }
}

impl IntoResponse for RecordingsError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidFilter(_) | Self::MissingFilter(..) => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            },
            Self::Io { .. } => {
                error!(error = %self, "Failed to list recordings");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to list recordings").into_response()
            },
        }
    }
}
