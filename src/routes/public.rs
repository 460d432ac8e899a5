use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints accessible to any client, anonymous or authenticated. All of
/// them are read-only against the store except registration, which creates
/// exactly one row for the caller itself.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Unauthenticated liveness probe for monitoring and load balancers.
        .route("/health", get(|| async { "ok" }))
        // POST /auth/register
        // Credentials registration. Hashes the password and assigns the
        // role from the admin allow-list; never issues a session.
        .route("/auth/register", post(handlers::register_user))
        // GET /categories?includeChildren=...
        // Lists the category hierarchy with per-category counts, flat or
        // nested up to two child levels.
        .route("/categories", get(handlers::get_categories))
        // GET /categories/{id}
        // Single category with its children attached.
        .route("/categories/{id}", get(handlers::get_category))
        // GET /resources?categoryId&type&search&storeAssociation&page&limit
        // Filtered, searchable, paginated resource listing.
        .route("/resources", get(handlers::get_resources))
        // GET /resources/{id}
        // Single resource with its category summaries.
        .route("/resources/{id}", get(handlers::get_resource))
}
