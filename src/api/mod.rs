use crate::api::handlers::{
    auth::{
        self, AuthConfig, AuthState, NoopAddressLookup, PgAuthStore, TokenIssuer,
        policy::{APP_MODE_HEADER, DEBUG_HEADER, DEVICE_ID_HEADER},
        provider::{HostedOtpProvider, OtpProviderChain, OutboxDelivery},
    },
    health, root,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, options},
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;
pub(crate) mod outbox;
pub(crate) mod sweeper;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything the server needs besides the token issuer and hosted provider.
#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub cors_allowed_origin: Option<String>,
    pub auth: AuthConfig,
    pub smtp: Option<outbox::SmtpConfig>,
    pub outbox: outbox::OutboxWorkerConfig,
    pub sweep: sweeper::SweepConfig,
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    config: ServerConfig,
    tokens: Arc<dyn TokenIssuer>,
    hosted: Arc<dyn HostedOtpProvider>,
) -> Result<()> {
    let ServerConfig {
        port,
        dsn,
        cors_allowed_origin,
        auth: auth_config,
        smtp,
        outbox: outbox_config,
        sweep: sweep_config,
    } = config;

    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let store: Arc<dyn auth::AuthStore> = Arc::new(PgAuthStore::new(pool.clone()));

    let ttl_minutes = auth_config.otp_ttl().num_minutes().max(1);
    let providers = OtpProviderChain::new(
        hosted,
        Arc::new(OutboxDelivery::new(store.clone(), ttl_minutes)),
    );

    let auth_state = Arc::new(AuthState::new(
        auth_config,
        store.clone(),
        providers,
        tokens,
        Arc::new(NoopAddressLookup),
    ));

    let email_sender: Arc<dyn outbox::EmailSender> = match smtp {
        Some(smtp) => {
            info!(host = %smtp.host(), port = smtp.port(), "SMTP delivery enabled");
            Arc::new(outbox::SmtpEmailSender::new(&smtp)?)
        }
        None => {
            warn!("SMTP is not configured; OTP emails are logged, not sent");
            Arc::new(outbox::LogEmailSender)
        }
    };

    // Background worker drains message_outbox and retries failures with backoff.
    outbox::spawn_outbox_worker(
        pool,
        outbox::OutboxSenders {
            email: email_sender,
            sms: Arc::new(outbox::LogSmsSender),
        },
        outbox_config,
    );
    sweeper::spawn_sweeper(store, sweep_config);

    let cors = cors_layer(cors_allowed_origin.as_deref())?;
    let app = app(auth_state, cors);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Assemble the HTTP application: documented routes, `/`, and the shared layers.
pub(crate) fn app(auth_state: Arc<AuthState>, cors: CorsLayer) -> Router {
    // Non-doc routes like `/` and preflight-only `OPTIONS /health` are added here;
    // the document stays in openapi.rs for the `openapi` binary.
    let (router, _openapi) = router().split_for_parts();
    router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state)),
        )
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn cors_layer(allowed_origin: Option<&str>) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(DEVICE_ID_HEADER),
            HeaderName::from_static(APP_MODE_HEADER),
            HeaderName::from_static(DEBUG_HEADER),
            HeaderName::from_static(auth::DEBUG_SECRET_HEADER),
        ])
        .allow_methods([Method::GET, Method::POST]);

    match allowed_origin {
        Some(origin) => Ok(layer.allow_origin(AllowOrigin::exact(origin_header(origin)?))),
        None => Ok(layer.allow_origin(Any)),
    }
}

fn origin_header(base_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(base_url).with_context(|| format!("Invalid CORS origin URL: {base_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("CORS origin must include a valid host: {base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build CORS origin header")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_header_strips_path_and_keeps_port() -> Result<()> {
        assert_eq!(
            origin_header("https://app.pinmate.app/welcome")?,
            HeaderValue::from_static("https://app.pinmate.app")
        );
        assert_eq!(
            origin_header("http://localhost:5173")?,
            HeaderValue::from_static("http://localhost:5173")
        );
        assert!(origin_header("not a url").is_err());
        Ok(())
    }

    #[test]
    fn cors_layer_accepts_optional_origin() {
        assert!(cors_layer(None).is_ok());
        assert!(cors_layer(Some("https://app.pinmate.app")).is_ok());
        assert!(cors_layer(Some("::bad::")).is_err());
    }
}
