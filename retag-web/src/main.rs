//! Servidor web Axum com WebSocket para descoberta e reinjeção de entidades TEI

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use retag_core::{
    codec, place_report, DiscoveryReport, EntityKind, FormatError, InjectError, InjectMode,
    InjectionReport, InjectorConfig, MemoryGazetteer, PipelineEvent, Registry, RegistryError,
    RetagPipeline, StructureError,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Configuração lida do ambiente
struct ServiceConfig {
    addr: String,
    registry_path: Option<PathBuf>,
    pleiades_path: Option<PathBuf>,
    geonames_path: Option<PathBuf>,
}

impl ServiceConfig {
    fn from_env() -> Self {
        let path = |name: &str| std::env::var_os(name).map(PathBuf::from);
        Self {
            addr: std::env::var("RETAG_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            registry_path: path("RETAG_REGISTRY"),
            pleiades_path: path("RETAG_PLEIADES"),
            geonames_path: path("RETAG_GEONAMES"),
        }
    }
}

/// Estado compartilhado da aplicação
struct AppState {
    pipeline: RetagPipeline,
    registry: Mutex<Registry>,
    registry_path: Option<PathBuf>,
    gazetteer: Option<MemoryGazetteer>,
}

impl AppState {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Grava o registro em disco, se configurado. Falhas só são registradas no log.
    fn persist(&self, registry: &Registry) {
        if let Some(path) = &self.registry_path {
            if let Err(e) = codec::save_csv_path(registry, path) {
                warn!(path = %path.display(), error = %e, "falha ao gravar o registro");
            }
        }
    }
}

#[derive(Deserialize)]
struct DiscoverRequest {
    document: String,
    #[serde(default)]
    file: Option<String>,
}

#[derive(Deserialize)]
struct InjectRequest {
    document: String,
    #[serde(default)]
    mode: InjectMode,
    #[serde(default)]
    kinds: Option<Vec<EntityKind>>,
}

#[derive(Serialize)]
struct InjectResponse {
    document: String,
    report: InjectionReport,
}

/// Mensagem WebSocket recebida do cliente
#[derive(Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
enum WsRequest {
    Discover {
        document: String,
        #[serde(default)]
        file: Option<String>,
    },
    Inject {
        document: String,
        #[serde(default)]
        mode: InjectMode,
    },
}

impl WsRequest {
    fn document(&self) -> &str {
        match self {
            WsRequest::Discover { document, .. } | WsRequest::Inject { document, .. } => document,
        }
    }
}

/// Falhas de requisição e seu status HTTP
enum ApiError {
    EmptyDocument,
    Structure(StructureError),
    Format(FormatError),
    Internal(String),
}

impl From<StructureError> for ApiError {
    fn from(e: StructureError) -> Self {
        ApiError::Structure(e)
    }
}

impl From<FormatError> for ApiError {
    fn from(e: FormatError) -> Self {
        ApiError::Format(e)
    }
}

impl From<InjectError> for ApiError {
    fn from(e: InjectError) -> Self {
        match e {
            InjectError::Structure(s) => ApiError::Structure(s),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::EmptyDocument => StatusCode::BAD_REQUEST,
            ApiError::Structure(_) | ApiError::Format(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::EmptyDocument => "Documento vazio".to_string(),
            ApiError::Structure(e) => e.to_string(),
            ApiError::Format(e) => e.to_string(),
            ApiError::Internal(m) => m.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(serde_json::json!({"error": self.message()}))).into_response()
    }
}

/// Executa trabalho síncrono do core fora do runtime
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

fn load_registry(path: Option<&PathBuf>) -> Registry {
    let Some(path) = path.filter(|p| p.exists()) else {
        return Registry::new();
    };
    match codec::load_csv_path(path) {
        Ok(registry) => {
            info!(path = %path.display(), entities = registry.len(), "registro carregado");
            registry
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "registro ignorado");
            Registry::new()
        }
    }
}

fn load_gazetteer(config: &ServiceConfig) -> Option<MemoryGazetteer> {
    if config.pleiades_path.is_none() && config.geonames_path.is_none() {
        return None;
    }
    let mut gazetteer = MemoryGazetteer::new();
    let report = |source: &str, result: Result<usize, RegistryError>| match result {
        Ok(rows) => info!(source, rows, "gazetteer carregado"),
        Err(e) => warn!(source, error = %e, "gazetteer ignorado"),
    };
    if let Some(path) = &config.pleiades_path {
        report("pleiades", gazetteer.load_pleiades_path(path));
    }
    if let Some(path) = &config.geonames_path {
        report("geonames", gazetteer.load_geonames_path(path));
    }
    Some(gazetteer)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::from_env();
    let state = Arc::new(AppState {
        pipeline: RetagPipeline::default(),
        registry: Mutex::new(load_registry(config.registry_path.as_ref())),
        registry_path: config.registry_path.clone(),
        gazetteer: load_gazetteer(&config),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/discover", post(discover_handler))
        .route("/inject", post(inject_handler))
        .route("/registry", get(registry_get_handler).post(registry_post_handler))
        .route("/places", get(places_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .expect("endereço de escuta válido");
    info!("Servidor retag iniciado em http://{}", config.addr);
    axum::serve(listener, app).await.expect("servidor encerrado com erro");
}

/// Retorna a página principal HTML
async fn index_handler() -> impl IntoResponse {
    Html(include_str!("templates/index.html"))
}

/// Descoberta via HTTP POST: atualiza o registro compartilhado
async fn discover_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DiscoverRequest>,
) -> Result<Json<DiscoveryReport>, ApiError> {
    if req.document.trim().is_empty() {
        return Err(ApiError::EmptyDocument);
    }
    let report = blocking(move || {
        let mut registry = state.registry();
        let report = state
            .pipeline
            .discover(&req.document, &mut registry, req.file.as_deref())?;
        state.persist(&registry);
        Ok(report)
    })
    .await?;
    info!(
        file = report.file.as_deref().unwrap_or("-"),
        nodes = report.nodes,
        created = report.created,
        "documento descoberto"
    );
    Ok(Json(report))
}

/// Reinjeção via HTTP POST (sem streaming)
async fn inject_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InjectRequest>,
) -> Result<Json<InjectResponse>, ApiError> {
    if req.document.trim().is_empty() {
        return Err(ApiError::EmptyDocument);
    }
    let (document, report) = blocking(move || {
        let registry = state.registry();
        let mut pipeline = state.pipeline.clone();
        if let Some(kinds) = req.kinds {
            pipeline.config = InjectorConfig {
                kinds,
                ..pipeline.config
            };
        }
        Ok(pipeline.inject(&req.document, &registry, req.mode)?)
    })
    .await?;
    Ok(Json(InjectResponse { document, report }))
}

/// Registro completo em CSV
async fn registry_get_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let csv = blocking(move || Ok(codec::to_csv_string(&state.registry())?)).await?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv).into_response())
}

/// Mescla um CSV enviado no registro compartilhado
async fn registry_post_handler(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError::EmptyDocument);
    }
    let total = blocking(move || {
        let incoming = codec::from_csv_str(&body)?;
        let mut registry = state.registry();
        registry.merge(incoming);
        state.persist(&registry);
        Ok(registry.len())
    })
    .await?;
    Ok(Json(serde_json::json!({"entities": total})))
}

/// Lugares do registro, com coordenadas quando o gazetteer está configurado
async fn places_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.registry();
    let gazetteer = state.gazetteer.as_ref().map(|g| g as &dyn retag_core::Gazetteer);
    Json(place_report(&registry, gazetteer))
}

/// Upgrade HTTP → WebSocket
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Lógica do WebSocket: recebe um pedido, executa o pipeline e envia os eventos
async fn handle_websocket(mut socket: WebSocket, state: Arc<AppState>) {
    info!("WebSocket conectado");

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                // JSON {task, document, ...}; texto puro vira reinjeção em modo replace
                let request = serde_json::from_str::<WsRequest>(&text).unwrap_or_else(|_| WsRequest::Inject {
                    document: text.to_string(),
                    mode: InjectMode::Replace,
                });
                if request.document().trim().is_empty() {
                    continue;
                }

                let (tx, rx) = std::sync::mpsc::channel::<PipelineEvent>();
                let state_for_thread = Arc::clone(&state);

                // O pipeline é síncrono: roda fora do runtime
                let handle = tokio::task::spawn_blocking(move || match request {
                    WsRequest::Discover { document, file } => {
                        let mut registry = state_for_thread.registry();
                        state_for_thread
                            .pipeline
                            .discover_streaming(&document, &mut registry, file.as_deref(), tx);
                        state_for_thread.persist(&registry);
                    }
                    WsRequest::Inject { document, mode } => {
                        let registry = state_for_thread.registry();
                        state_for_thread
                            .pipeline
                            .inject_streaming(&document, &registry, mode, tx);
                    }
                });
                handle.await.ok();

                let events: Vec<PipelineEvent> = rx.try_iter().collect();
                for event in &events {
                    if let Ok(json) = serde_json::to_string(event) {
                        if socket.send(Message::Text(json)).await.is_err() {
                            return; // cliente desconectou
                        }
                    }
                }
            }
            Message::Close(_) => {
                info!("WebSocket desconectado");
                return;
            }
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            _ => {}
        }
    }
}
