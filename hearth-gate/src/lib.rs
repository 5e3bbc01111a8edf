//! HTTP surface for the license gate: the authority push endpoint and the
//! enforcement middleware a host application wraps its router with.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use hearth_license::{
    AuthorityClient, AuthorityEndpoints, BypassList, EnforcementEngine, Gate, GateConfig,
    LicenseManager, LicenseStore, LocalLicenseSource, OverrideStore, PanicUnlock, PushHealth,
    PushReceiver, PushRequest, RequestContext, SelfCheck, TrustResolver,
};
use serde_json::json;
use tracing::{error, info, warn};

/// Path the authority pushes licenses to.
pub const PUSH_PATH: &str = "/.well-known/push-license";

/// Everything the router and middleware need, shared across requests.
pub struct GateState {
    pub push: PushReceiver,
    pub gate: Gate,
    /// Host the deployment is licensed for.
    pub host: String,
}

/// Long-lived services built once from configuration.
pub struct Services {
    pub config: GateConfig,
    pub store: Arc<LicenseStore>,
    pub resolver: Arc<TrustResolver>,
    local_source: Option<Arc<dyn LocalLicenseSource>>,
}

impl Services {
    pub fn from_config(config: GateConfig) -> Result<Self> {
        let codec = config.codec().context("Failed to build license codec")?;
        let store = Arc::new(LicenseStore::new(config.license_path(), codec));

        let authority = match config.authority_base() {
            Some(base) => Some(
                AuthorityClient::new(base, endpoints(&config), config.remote_timeout())
                    .context("Failed to build authority client")?,
            ),
            None => None,
        };
        let bundled = config
            .bundled_key_path
            .as_deref()
            .and_then(TrustResolver::load_bundled_key);
        if bundled.is_none() {
            warn!("No bundled authority key; signatures verify only through the key set");
        }

        Ok(Self {
            store,
            resolver: Arc::new(TrustResolver::new(authority, bundled)),
            config,
            local_source: None,
        })
    }

    /// Supplies the local license database used when this host is its own authority.
    pub fn with_local_source(mut self, source: Arc<dyn LocalLicenseSource>) -> Self {
        self.local_source = Some(source);
        self
    }

    pub fn engine(&self) -> EnforcementEngine {
        let engine = EnforcementEngine::new(
            Arc::clone(&self.store),
            OverrideStore::new(self.config.override_path()),
        );
        match (&self.local_source, self.config.is_self_authority()) {
            (Some(source), true) => {
                let url = self
                    .config
                    .authority_base()
                    .or(self.config.app_url.as_deref())
                    .unwrap_or_default()
                    .to_string();
                engine.with_local_authority(Arc::clone(source), url)
            }
            _ => engine,
        }
    }

    pub fn gate_state(&self) -> Arc<GateState> {
        let host = self.config.app_host();
        let push = PushReceiver::new(
            Arc::clone(&self.resolver),
            Arc::clone(&self.store),
            host.clone(),
            self.config.authority_base().map(str::to_string),
        );
        let gate = Gate::new(BypassList::new(self.config.bypass_paths.clone()), self.engine());
        Arc::new(GateState { push, gate, host })
    }

    /// Boot self-check. A bundled key the authority does not publish is
    /// fatal; an unreachable or unusable key set is logged and skipped.
    pub async fn boot_check(&self) -> Result<SelfCheck> {
        self.resolver
            .self_check()
            .await
            .inspect_err(|e| error!("Boot self-check failed: {e}"))
            .context("Refusing to start")
    }

    pub fn manager(&self) -> LicenseManager {
        LicenseManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.resolver),
            self.config.app_host(),
        )
    }
}

/// Panic unlock for `config`. Needs no codec, so it works even when the
/// license store is unusable.
pub fn panic_unlock(config: &GateConfig) -> PanicUnlock {
    PanicUnlock::new(
        OverrideStore::new(config.override_path()),
        config.max_unlock_ttl(),
        config.audit_unlocks,
    )
}

fn endpoints(config: &GateConfig) -> AuthorityEndpoints {
    AuthorityEndpoints {
        verify: config.verify_endpoint.clone(),
        pem: config.pem_endpoint.clone(),
        jwks: config.jwks_path.clone(),
    }
}

async fn push_handler(
    State(state): State<Arc<GateState>>,
    body: Result<Json<PushRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, &rejection.body_text());
        }
    };

    match state.push.receive(request, Utc::now()).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_response(status, &e.to_string())
        }
    }
}

async fn push_health(State(state): State<Arc<GateState>>) -> Json<PushHealth> {
    Json(state.push.health())
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Build the push endpoint router with the given state.
pub fn build_router(state: Arc<GateState>) -> Router {
    Router::new()
        .route(PUSH_PATH, get(push_health).post(push_handler))
        .with_state(state)
}

/// Middleware: evaluates the gate for every request and answers blocked
/// ones with 403 and the fixed message.
pub async fn enforce(State(state): State<Arc<GateState>>, request: Request, next: Next) -> Response {
    let ctx = RequestContext::web(request.uri().path(), &state.host);
    let decision = state.gate.check(&ctx, Utc::now());

    match decision.message() {
        None => next.run(request).await,
        Some(message) => (StatusCode::FORBIDDEN, Html(block_page(message))).into_response(),
    }
}

/// Wraps `app` with enforcement and mounts the push routes alongside it.
pub fn with_enforcement(app: Router, state: Arc<GateState>) -> Router {
    app.merge(build_router(Arc::clone(&state)))
        .layer(middleware::from_fn_with_state(state, enforce))
}

fn block_page(message: &str) -> String {
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>License required</title></head>\
         <body><main><h1>License required</h1><p>{message}</p></main></body></html>\n"
    )
}

/// Serves `app` on `listener` until ctrl-c.
pub async fn serve(listener: tokio::net::TcpListener, app: Router) -> Result<()> {
    info!("License gate listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server failed")
}
