//! HTTP API for the provider.
//!
//! The `/system` surface carries deployment, scaling, and status
//! operations; `/function/{name}` proxies invocations to the instance (or
//! gateway) picked by the resolver.

pub mod error;
pub mod handlers;
pub mod state;
pub mod types;
pub mod validation;

use axum::routing::{any, get, post};
use axum::Router;
use state::AppState;
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation for the provider API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "unifaas API",
        description = "Function-as-a-service control plane for unikernel microVMs.",
        license(name = "Apache-2.0", url = "https://www.apache.org/licenses/LICENSE-2.0")
    ),
    tags(
        (name = "Functions", description = "Function lifecycle management"),
        (name = "System", description = "Provider status and namespaces")
    ),
    paths(
        handlers::deploy::deploy,
        handlers::update::update,
        handlers::delete::delete,
        handlers::list::list,
        handlers::status::status,
        handlers::scale::scale,
        handlers::namespaces::namespaces,
        handlers::info::info,
        handlers::logs::logs,
        handlers::health::health,
    ),
    components(schemas(
        types::FunctionDeployment,
        types::FunctionResources,
        types::FunctionStatus,
        types::ScaleServiceRequest,
        types::DeleteFunctionRequest,
        types::InfoResponse,
        types::HealthResponse,
        types::ApiErrorResponse,
    ))
)]
pub struct ApiDoc;

/// Create the provider router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let write_timeout = state.config.write_timeout;

    // Invocations stream through to the function and are not bounded by
    // the system write timeout.
    let system_routes = Router::new()
        .route(
            "/system/functions",
            post(handlers::deploy::deploy)
                .put(handlers::update::update)
                .delete(handlers::delete::delete)
                .get(handlers::list::list),
        )
        .route("/system/function/:name", get(handlers::status::status))
        .route("/system/scale-function/:name", post(handlers::scale::scale))
        .route("/system/namespaces", get(handlers::namespaces::namespaces))
        .route("/system/info", get(handlers::info::info))
        .route("/system/logs", get(handlers::logs::logs))
        .layer(TimeoutLayer::new(write_timeout));

    let invoke_routes = Router::new()
        .route("/function/:name", any(handlers::invoke::invoke))
        .route(
            "/function/:name/*path",
            any(handlers::invoke::invoke_subpath),
        );

    Router::new()
        .route("/health", get(handlers::health::health))
        .merge(system_routes)
        .merge(invoke_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
