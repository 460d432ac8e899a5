use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{patch, post},
};

/// Admin Router Module
///
/// Every mutating endpoint of the application. The routes mount at their
/// public paths (the API contract fixes the URLs), but the whole router is
/// wrapped in an authentication layer by `create_router`, each handler
/// extracts `RequireAdmin`, and the store accessors re-check the actor's
/// role before writing.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // POST /categories
        // Creates a category; the slug is derived and de-duplicated
        // server-side.
        .route("/categories", post(handlers::create_category))
        // PATCH/DELETE /categories/{id}
        // Partial update (self-parenting rejected) and guarded delete
        // (refused while children or resources depend on the category).
        .route(
            "/categories/{id}",
            patch(handlers::update_category).delete(handlers::delete_category),
        )
        // POST /resources
        // Creates a resource with its category associations.
        .route("/resources", post(handlers::create_resource))
        // PATCH/DELETE /resources/{id}
        // Full-payload update and delete. Deleting leaves the uploaded
        // file on disk.
        .route(
            "/resources/{id}",
            patch(handlers::update_resource).delete(handlers::delete_resource),
        )
        // POST /upload
        // Multipart file upload with MIME/size validation; files land
        // under a per-type subdirectory of the upload root.
        .route("/upload", post(handlers::upload_file))
}
