//! Web server entrypoints live here.

use std::{
    collections::HashSet,
    future::Future,
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{MatchedPath, Path, State, connect_info::ConnectInfo, rejection::JsonRejection},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch};
use tokio_util::io::ReaderStream;
use tower_http::{
    add_extension::AddExtensionLayer,
    classify::ServerErrorsFailureClass,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{CorsConfig, ProxyMode, RateLimitConfig, ServerConfig, parse_header, parse_method};
use crate::jobs::{
    JobService, JobServiceError, JobServiceErrorKind, JobSnapshot, JobTicket, SubmitJobParams,
};

const HEALTHZ_PATH: &str = "/v1/healthz";
const JOBS_PATH: &str = "/v1/jobs";
const JOB_PATH: &str = "/v1/jobs/{job_id}";
const JOB_ARCHIVE_PATH: &str = "/v1/jobs/{job_id}/archive";
const DISTRICTS_PATH: &str = "/v1/districts";
const HEALTHZ_STATUS: &str = "ok";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const ZIP_CONTENT_TYPE: &str = "application/zip";
const ERROR_INVALID_PARAMETER: &str = "invalid_parameter";
const ERROR_INVALID_RANGE: &str = "invalid_range";
const ERROR_UNKNOWN_DISTRICT: &str = "unknown_district";
const ERROR_ALREADY_ACTIVE: &str = "job_already_active";
const ERROR_NOT_FOUND: &str = "not_found";
const ERROR_NOT_COMPLETED: &str = "job_not_completed";
const ERROR_GONE: &str = "artifact_gone";
const ERROR_METHOD_NOT_ALLOWED: &str = "method_not_allowed";
const ERROR_RATE_LIMITED: &str = "rate_limited";
const ERROR_INTERNAL: &str = "internal_server_error";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Serialize, Copy, Clone, PartialEq, Eq)]
struct HealthzResponse {
    status: &'static str,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ShutdownEvent {
    Pending,
    CtrlC,
    SigTerm,
    ListenerFailed,
}

/// Identity used for admission control; the client IP as seen through any
/// trusted proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Requester(String);

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SubmitJobBody {
    from_date: Option<String>,
    to_date: Option<String>,
    district_name: Option<String>,
}

type DynJobService = Arc<dyn JobService>;
type ApiStateHandle = Arc<ApiState>;

#[derive(Clone)]
struct ApiState {
    jobs: DynJobService,
}

#[derive(Clone)]
struct ClientState {
    limiter: Option<Arc<DefaultKeyedRateLimiter<String>>>,
    proxy_mode: ProxyMode,
    trusted: Arc<HashSet<IpAddr>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

#[derive(Debug, Clone)]
struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listen address may not be empty")]
    EmptyListenAddr,
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to determine local address: {source}")]
    LocalAddr {
        #[source]
        source: std::io::Error,
    },
    #[error("axum server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
    #[error("invalid rate limit configuration: {reason}")]
    RateLimitConfig { reason: String },
    #[error("invalid CORS configuration: {reason}")]
    CorsConfig { reason: String },
}

impl ClientState {
    fn try_new(config: &ServerConfig) -> Result<Arc<Self>, ServerError> {
        let limiter = if config.rate_limit.enabled {
            Some(Arc::new(build_keyed_limiter(&config.rate_limit)?))
        } else {
            None
        };
        Ok(Arc::new(Self {
            limiter,
            proxy_mode: config.proxy_mode,
            trusted: Arc::new(config.trusted_proxies.iter().copied().collect()),
        }))
    }
}

fn build_keyed_limiter(
    cfg: &RateLimitConfig,
) -> Result<DefaultKeyedRateLimiter<String>, ServerError> {
    // `max_requests` cells replenish per `window_ms`; `burst` bounds the bucket.
    let per_cell_ms = (cfg.window_ms.get() / u64::from(cfg.max_requests.get())).max(1);
    let quota = Quota::with_period(Duration::from_millis(per_cell_ms)).ok_or_else(|| {
        ServerError::RateLimitConfig {
            reason: "replenish period must be non-zero".to_string(),
        }
    })?;
    let burst = NonZeroU32::new(cfg.burst.get()).ok_or_else(|| ServerError::RateLimitConfig {
        reason: "burst must be non-zero".to_string(),
    })?;
    Ok(DefaultKeyedRateLimiter::<String>::keyed(
        quota.allow_burst(burst),
    ))
}

async fn client_identity_middleware(
    State(state): State<Arc<ClientState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&req, state.proxy_mode, state.trusted.as_ref())
        .unwrap_or_else(|| IpAddr::from([0, 0, 0, 0]));
    let requester = Requester(ip.to_string());

    let is_submission = req.method() == Method::POST && matched_path_or_uri(&req) == JOBS_PATH;
    if let (true, Some(limiter)) = (is_submission, state.limiter.as_ref()) {
        if let Err(negative) = limiter.check_key(&requester.0) {
            let wait = negative.wait_time_from(DefaultClock::default().now());
            let wait_ms = (wait.as_millis() as u64).max(1);
            let mut response = ApiError::rate_limited(wait_ms)
                .with_request_id(header_request_id(req.headers()).as_deref())
                .into_response();
            let secs = wait_ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return response;
        }
    }

    req.extensions_mut().insert(requester);
    next.run(req).await
}

fn extract_client_ip(
    req: &Request<Body>,
    mode: ProxyMode,
    trusted: &HashSet<IpAddr>,
) -> Option<IpAddr> {
    let peer_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())?;

    if !trusted.contains(&peer_ip) {
        return Some(peer_ip);
    }

    match mode {
        ProxyMode::Off => Some(peer_ip),
        ProxyMode::XForwardedFor => parse_xff(req.headers()).or(Some(peer_ip)),
        ProxyMode::Forwarded => parse_forwarded(req.headers()).or(Some(peer_ip)),
    }
}

fn parse_xff(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .and_then(|ip| ip.parse::<IpAddr>().ok())
}

fn parse_forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("forwarded")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| {
            s.split(';')
                .flat_map(|part| part.split(','))
                .find_map(|kv| {
                    let rest = kv.trim().strip_prefix("for=")?;
                    rest.trim_matches('"').parse::<IpAddr>().ok()
                })
        })
}

impl SubmitJobBody {
    fn into_params(self, requester: Requester) -> Result<SubmitJobParams, ApiError> {
        let SubmitJobBody {
            from_date,
            to_date,
            district_name,
        } = self;
        Ok(SubmitJobParams {
            from_date: required_field("fromDate", from_date)?,
            to_date: required_field("toDate", to_date)?,
            district_name: required_field("districtName", district_name)?,
            requester: requester.0,
        })
    }
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            body: ApiErrorBody {
                error,
                message: message.into(),
                field: None,
                job_id: None,
                retry_after_ms: None,
                request_id: None,
            },
        }
    }

    fn with_field(mut self, field: Option<String>) -> Self {
        self.body.field = field;
        self
    }

    fn with_request_id(mut self, request_id: Option<&str>) -> Self {
        if let Some(id) = request_id {
            self.body.request_id = Some(id.to_string());
        }
        self
    }

    fn invalid_param(field: &str, message: impl Into<String>) -> Self {
        debug_assert!(!field.is_empty());
        ApiError::new(StatusCode::BAD_REQUEST, ERROR_INVALID_PARAMETER, message)
            .with_field(Some(field.to_string()))
    }

    fn internal() -> Self {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ERROR_INTERNAL,
            "internal server error",
        )
    }

    fn resource_not_found(path: &str) -> Self {
        ApiError::new(
            StatusCode::NOT_FOUND,
            ERROR_NOT_FOUND,
            format!("resource `{path}` not found"),
        )
    }

    fn method_not_allowed(method: &str, path: &str) -> Self {
        ApiError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            ERROR_METHOD_NOT_ALLOWED,
            format!("method `{method}` not allowed for `{path}`"),
        )
    }

    fn rate_limited(retry_after_ms: u64) -> Self {
        let mut error = ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            ERROR_RATE_LIMITED,
            "too many submissions; retry after backoff",
        );
        error.body.retry_after_ms = Some(retry_after_ms);
        error
    }
}

impl From<JobServiceError> for ApiError {
    fn from(error: JobServiceError) -> Self {
        let JobServiceError {
            kind,
            message,
            field,
        } = error;
        match kind {
            JobServiceErrorKind::InvalidParameter => {
                ApiError::new(StatusCode::BAD_REQUEST, ERROR_INVALID_PARAMETER, message)
                    .with_field(field)
            }
            JobServiceErrorKind::InvalidRange => {
                ApiError::new(StatusCode::BAD_REQUEST, ERROR_INVALID_RANGE, message)
                    .with_field(field)
            }
            JobServiceErrorKind::UnknownDistrict => {
                ApiError::new(StatusCode::BAD_REQUEST, ERROR_UNKNOWN_DISTRICT, message)
                    .with_field(field)
            }
            JobServiceErrorKind::AlreadyActive { job_id } => {
                let mut api = ApiError::new(StatusCode::CONFLICT, ERROR_ALREADY_ACTIVE, message);
                api.body.job_id = Some(job_id);
                api
            }
            JobServiceErrorKind::NotFound => {
                ApiError::new(StatusCode::NOT_FOUND, ERROR_NOT_FOUND, message)
            }
            JobServiceErrorKind::NotCompleted => {
                ApiError::new(StatusCode::CONFLICT, ERROR_NOT_COMPLETED, message)
            }
            JobServiceErrorKind::Gone => ApiError::new(StatusCode::GONE, ERROR_GONE, message),
            JobServiceErrorKind::Internal => {
                tracing::error!(%message, "job service request failed");
                ApiError::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn required_field(field: &str, value: Option<String>) -> Result<String, ApiError> {
    let Some(raw) = value else {
        return Err(ApiError::invalid_param(field, "must be provided"));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::invalid_param(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn content_disposition(download_name: &str) -> Option<HeaderValue> {
    let sanitized: String = download_name
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if ch.is_ascii_graphic() || ch == ' ' => ch,
            _ => '_',
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{sanitized}\"")).ok()
}

pub fn build_api_router() -> Router {
    debug_assert!(HEALTHZ_PATH.starts_with("/v1/"));
    debug_assert!(JOB_ARCHIVE_PATH.starts_with(JOBS_PATH));

    Router::new()
        .route(
            HEALTHZ_PATH,
            get(healthz).fallback(method_not_allowed_handler),
        )
        .route(
            JOBS_PATH,
            post(submit_job).fallback(method_not_allowed_handler),
        )
        .route(
            JOB_PATH,
            get(job_status).fallback(method_not_allowed_handler),
        )
        .route(
            JOB_ARCHIVE_PATH,
            get(job_archive).fallback(method_not_allowed_handler),
        )
        .route(
            DISTRICTS_PATH,
            get(list_districts).fallback(method_not_allowed_handler),
        )
}

/// Full application router: API routes plus identity, CORS, tracing and
/// request-id layers, with `service` injected as shared state.
pub fn build_router(config: &ServerConfig, service: DynJobService) -> Result<Router, ServerError> {
    let state: ApiStateHandle = Arc::new(ApiState { jobs: service });
    let client_state = ClientState::try_new(config)?;

    let mut router = Router::new()
        .merge(build_api_router())
        .fallback(not_found_handler)
        .layer(middleware::from_fn_with_state(
            client_state,
            client_identity_middleware,
        ));

    if config.cors.enabled {
        router = router.layer(build_cors_layer(&config.cors)?);
    }

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            let path = matched_path_or_uri(request);
            let request_id =
                header_request_id(request.headers()).unwrap_or_else(|| "-".to_string());
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                path = %path,
                request_id = %request_id
            )
        })
        .on_response(|response: &Response, latency: Duration, span: &tracing::Span| {
            let status = response.status().as_u16();
            let latency_ms = latency.as_millis().min(u128::from(u64::MAX)) as u64;
            tracing::info!(parent: span, status, latency_ms, "request completed");
        })
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, span: &tracing::Span| {
                let latency_ms = latency.as_millis().min(u128::from(u64::MAX)) as u64;
                tracing::error!(parent: span, latency_ms, error = %error, "request failed");
            },
        );
    router = router.layer(trace_layer);

    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);
    router = router
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(
            request_id_header,
            MakeRequestUuid,
        ));

    Ok(router.layer(AddExtensionLayer::new(state)))
}

pub async fn serve(config: ServerConfig, service: DynJobService) -> Result<(), ServerError> {
    debug_assert!(config.listen_addr.len() <= 128);

    let listen_addr = parse_listen_addr(&config.listen_addr)?;
    let listener = bind_listener(listen_addr).await?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| ServerError::LocalAddr { source })?;
    tracing::info!(%local_addr, "firwatch server listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownEvent::Pending);
    let shutdown_future = broadcast_shutdown(shutdown_tx);

    let app = build_router(&config, service)?;
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    let mut server_future = Box::pin(async move {
        axum::serve(listener, make_service)
            .with_graceful_shutdown(shutdown_future)
            .await
    });

    let mut drain_timeout = Box::pin(drain_timeout_future(shutdown_rx.clone()));

    tokio::select! {
        result = server_future.as_mut() => {
            if let Err(source) = result {
                return Err(ServerError::Serve { source });
            }
        }
        _ = drain_timeout.as_mut() => {
            // Timeout elapsed; dropping the server future forces termination.
        }
    }

    let final_event = *shutdown_rx.borrow();
    if final_event == ShutdownEvent::Pending {
        tracing::info!("server stopped without external shutdown signal");
    } else {
        tracing::info!(?final_event, "server shutdown complete");
    }

    Ok(())
}

fn build_cors_layer(config: &CorsConfig) -> Result<CorsLayer, ServerError> {
    let origins: Vec<HeaderValue> = config
        .allow_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|err| ServerError::CorsConfig {
                reason: format!("origin `{origin}` is not a valid header value: {err}"),
            })
        })
        .collect::<Result<_, _>>()?;

    let methods: Vec<Method> = config
        .allow_methods
        .iter()
        .map(|method| parse_method(method).map_err(|reason| ServerError::CorsConfig { reason }))
        .collect::<Result<_, _>>()?;

    let allow_headers: Vec<HeaderName> = config
        .allow_headers
        .iter()
        .map(|name| parse_header(name).map_err(|reason| ServerError::CorsConfig { reason }))
        .collect::<Result<_, _>>()?;

    let expose_headers: Vec<HeaderName> = config
        .expose_headers
        .iter()
        .map(|name| parse_header(name).map_err(|reason| ServerError::CorsConfig { reason }))
        .collect::<Result<_, _>>()?;

    let mut cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::list(methods))
        .max_age(Duration::from_secs(config.max_age_secs));

    if !allow_headers.is_empty() {
        cors = cors.allow_headers(AllowHeaders::list(allow_headers));
    }
    if !expose_headers.is_empty() {
        cors = cors.expose_headers(ExposeHeaders::list(expose_headers));
    }

    Ok(cors)
}

async fn submit_job(
    Extension(state): Extension<ApiStateHandle>,
    Extension(requester): Extension<Requester>,
    body: Result<Json<SubmitJobBody>, JsonRejection>,
) -> Result<(StatusCode, Json<JobTicket>), ApiError> {
    let Json(body) = body.map_err(|rejection| {
        ApiError::invalid_param("body", format!("malformed JSON body: {}", rejection.body_text()))
    })?;
    let params = body.into_params(requester)?;
    let ticket = state.jobs.submit(params).await.map_err(ApiError::from)?;
    tracing::info!(job_id = %ticket.job_id, "job accepted");
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

async fn job_status(
    Extension(state): Extension<ApiStateHandle>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let snapshot = state.jobs.status(&job_id).await.map_err(ApiError::from)?;
    Ok(Json(snapshot))
}

async fn job_archive(
    Extension(state): Extension<ApiStateHandle>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let handle = state.jobs.artifact(&job_id).await.map_err(ApiError::from)?;

    let file = match tokio::fs::File::open(&handle.path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::from(JobServiceError::gone(&job_id)));
        }
        Err(err) => {
            return Err(ApiError::from(JobServiceError::internal(format!(
                "failed to open archive {} for job `{job_id}`: {err}",
                handle.path.display()
            ))));
        }
    };
    let length = file.metadata().await.ok().map(|meta| meta.len());

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(ZIP_CONTENT_TYPE),
    );
    if let Some(value) = content_disposition(&handle.download_name) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}

async fn list_districts(Extension(state): Extension<ApiStateHandle>) -> Json<Vec<String>> {
    Json(state.jobs.districts())
}

async fn healthz() -> impl IntoResponse {
    Json(HealthzResponse {
        status: HEALTHZ_STATUS,
    })
}

async fn method_not_allowed_handler(request: Request<Body>) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let request_id = header_request_id(request.headers());
    ApiError::method_not_allowed(&method, &path)
        .with_request_id(request_id.as_deref())
        .into_response()
}

async fn not_found_handler(request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();
    let request_id = header_request_id(request.headers());
    ApiError::resource_not_found(&path)
        .with_request_id(request_id.as_deref())
        .into_response()
}

fn matched_path_or_uri<B>(request: &Request<B>) -> String {
    if let Some(path) = request.extensions().get::<MatchedPath>() {
        return path.as_str().to_string();
    }
    request.uri().path().to_string()
}

fn header_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

async fn wait_for_shutdown() -> ShutdownEvent {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownEvent::CtrlC,
            Err(error) => {
                tracing::warn!(%error, "failed to capture Ctrl+C signal");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => match term.recv().await {
                Some(_) => ShutdownEvent::SigTerm,
                None => ShutdownEvent::ListenerFailed,
            },
            Err(error) => {
                tracing::warn!(%error, "failed to capture SIGTERM");
                ShutdownEvent::ListenerFailed
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending();

    tokio::select! {
        event = ctrl_c => event,
        event = sigterm => event,
    }
}

fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ServerError::EmptyListenAddr);
    }

    trimmed
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: trimmed.to_string(),
            source,
        })
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr.to_string(),
            source,
        })
}

fn broadcast_shutdown(
    sender: watch::Sender<ShutdownEvent>,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let event = wait_for_shutdown().await;
        debug_assert!(event != ShutdownEvent::Pending);
        if let Err(error) = sender.send(event) {
            tracing::warn!(?event, %error, "failed to broadcast shutdown event");
        }
    }
}

fn drain_timeout_future(
    mut receiver: watch::Receiver<ShutdownEvent>,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        if receiver.changed().await.is_ok() {
            let event = *receiver.borrow_and_update();
            tracing::info!(?event, "shutdown signal received; draining connections");
            tokio::time::sleep(DRAIN_TIMEOUT).await;
            tracing::warn!(
                ?event,
                seconds = DRAIN_TIMEOUT.as_secs(),
                "graceful shutdown timed out; continuing shutdown"
            );
        }
    }
}
