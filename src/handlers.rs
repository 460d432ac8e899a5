use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    auth::{self, RequireAdmin},
    error::{AppError, AppResult},
    models::{
        ApiResponse, Category, CreateCategoryRequest, CreateResourceRequest, MessageResponse,
        PaginatedResponse, Pagination, ROLE_ADMIN, ROLE_USER, RegisterRequest, Resource,
        ResourceFilter, UpdateCategoryRequest, UploadResponse, User,
    },
    tree::{self, CategoryNode},
    upload::{self, UploadKind},
};

// --- Query Parameter Structs ---

/// CategoryListQuery
///
/// Accepted query parameters for the category listing endpoint.
#[derive(Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct CategoryListQuery {
    /// When true, the response nests up to two levels of children per root.
    pub include_children: Option<bool>,
}

// --- Category Handlers ---

/// get_categories
///
/// [Public Route] Lists every category with its dependent counts. With
/// `includeChildren=true` the flat rows are assembled into a forest (at
/// most two child levels deep); otherwise the flat list is returned as-is.
#[utoipa::path(
    get,
    path = "/categories",
    params(CategoryListQuery),
    responses((status = 200, description = "All categories", body = [Category]))
)]
pub async fn get_categories(
    State(state): State<AppState>,
    Query(query): Query<CategoryListQuery>,
) -> AppResult<Response> {
    let flat = state.repo.list_categories().await?;

    if query.include_children.unwrap_or(false) {
        let mut forest = tree::build_tree(&flat);
        tree::prune(&mut forest, 2);
        Ok(Json(ApiResponse::new(forest)).into_response())
    } else {
        Ok(Json(ApiResponse::new(flat)).into_response())
    }
}

/// get_category
///
/// [Public Route] Retrieves a single category with up to two levels of
/// children attached.
#[utoipa::path(
    get,
    path = "/categories/{id}",
    params(("id" = i64, Path, description = "Category ID")),
    responses(
        (status = 200, description = "Found", body = CategoryNode),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<CategoryNode>>> {
    let category = state
        .repo
        .get_category(id)
        .await?
        .ok_or(AppError::NotFound("Category"))?;

    let flat = state.repo.list_categories().await?;
    let forest = tree::build_tree(&flat);

    let mut node = match tree::find(&forest, id) {
        Some(node) => node.clone(),
        // A node stranded on a bad parent chain never reaches a root;
        // serve it without children rather than failing the request.
        None => CategoryNode {
            category,
            children: Vec::new(),
        },
    };
    tree::prune(&mut node.children, 1);

    Ok(Json(ApiResponse::new(node)))
}

/// create_category
///
/// [Admin Route] Creates a category. The slug is derived server-side from
/// the name; collisions get a numeric suffix.
#[utoipa::path(
    post,
    path = "/categories",
    request_body = CreateCategoryRequest,
    responses(
        (status = 201, description = "Created", body = Category),
        (status = 400, description = "Invalid data"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn create_category(
    RequireAdmin(actor): RequireAdmin,
    State(state): State<AppState>,
    Json(payload): Json<CreateCategoryRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Category>>)> {
    payload.validate()?;
    let category = state.repo.create_category(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(category))))
}

/// update_category
///
/// [Admin Route] Partially updates a category. Self-parenting is rejected;
/// the slug is regenerated only when the name changes.
#[utoipa::path(
    patch,
    path = "/categories/{id}",
    params(("id" = i64, Path, description = "Category ID")),
    request_body = UpdateCategoryRequest,
    responses(
        (status = 200, description = "Updated", body = Category),
        (status = 400, description = "Invalid data"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_category(
    RequireAdmin(actor): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCategoryRequest>,
) -> AppResult<Json<ApiResponse<Category>>> {
    payload.validate()?;
    let category = state.repo.update_category(&actor, id, payload).await?;
    Ok(Json(ApiResponse::new(category)))
}

/// delete_category
///
/// [Admin Route] Deletes a category. Refused with a 400 while the category
/// still has subcategories or linked resources.
#[utoipa::path(
    delete,
    path = "/categories/{id}",
    params(("id" = i64, Path, description = "Category ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 400, description = "Has children or resources"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_category(
    RequireAdmin(actor): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<MessageResponse>> {
    state.repo.delete_category(&actor, id).await?;
    Ok(Json(MessageResponse::new("Category deleted successfully")))
}

// --- Resource Handlers ---

/// get_resources
///
/// [Public Route] Lists resources with filtering, free-text search, and
/// pagination. Unknown filter values are ignored rather than rejected.
#[utoipa::path(
    get,
    path = "/resources",
    params(ResourceFilter),
    responses((status = 200, description = "Filtered resources", body = [Resource]))
)]
pub async fn get_resources(
    State(state): State<AppState>,
    Query(filter): Query<ResourceFilter>,
) -> AppResult<Json<PaginatedResponse<Resource>>> {
    let page = filter.page();
    let limit = filter.limit();

    let (resources, total) = state.repo.list_resources(filter).await?;

    Ok(Json(PaginatedResponse::new(
        resources,
        Pagination::new(page, limit, total),
    )))
}

/// get_resource
///
/// [Public Route] Retrieves a single resource with its category summaries.
#[utoipa::path(
    get,
    path = "/resources/{id}",
    params(("id" = Uuid, Path, description = "Resource ID")),
    responses(
        (status = 200, description = "Found", body = Resource),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Resource>>> {
    let resource = state
        .repo
        .get_resource(id)
        .await?
        .ok_or(AppError::NotFound("Resource"))?;
    Ok(Json(ApiResponse::new(resource)))
}

/// create_resource
///
/// [Admin Route] Creates a resource. The `type` discriminant dictates which
/// source field the payload must carry (enforced by the tagged union at
/// deserialization) and the category set must be non-empty and valid.
#[utoipa::path(
    post,
    path = "/resources",
    request_body = CreateResourceRequest,
    responses(
        (status = 201, description = "Created", body = Resource),
        (status = 400, description = "Invalid data"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn create_resource(
    RequireAdmin(actor): RequireAdmin,
    State(state): State<AppState>,
    Json(payload): Json<CreateResourceRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Resource>>)> {
    payload.validate()?;
    let resource = state.repo.create_resource(&actor, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            resource,
            "Resource created successfully",
        )),
    ))
}

/// update_resource
///
/// [Admin Route] Updates a resource from a full create-shaped payload and
/// replaces its category associations.
#[utoipa::path(
    patch,
    path = "/resources/{id}",
    params(("id" = Uuid, Path, description = "Resource ID")),
    request_body = CreateResourceRequest,
    responses(
        (status = 200, description = "Updated", body = Resource),
        (status = 400, description = "Invalid data"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_resource(
    RequireAdmin(actor): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateResourceRequest>,
) -> AppResult<Json<ApiResponse<Resource>>> {
    payload.validate()?;
    let resource = state.repo.update_resource(&actor, id, payload).await?;
    Ok(Json(ApiResponse::with_message(
        resource,
        "Resource updated successfully",
    )))
}

/// delete_resource
///
/// [Admin Route] Deletes a resource and its category associations. The
/// uploaded file is left on disk (cleanup is deferred).
#[utoipa::path(
    delete,
    path = "/resources/{id}",
    params(("id" = Uuid, Path, description = "Resource ID")),
    responses(
        (status = 200, description = "Deleted", body = MessageResponse),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_resource(
    RequireAdmin(actor): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    state.repo.delete_resource(&actor, id).await?;
    Ok(Json(MessageResponse::new("Resource deleted successfully")))
}

// --- Upload Handler ---

/// upload_file
///
/// [Admin Route] Multipart upload of `{file, type}`. The declared MIME
/// type must be on the allow-list for the declared kind, the size capped
/// at 20 MB, and the on-disk name is made collision-resistant before the
/// storage service persists it.
#[utoipa::path(
    post,
    path = "/upload",
    responses(
        (status = 200, description = "Stored", body = UploadResponse),
        (status = 400, description = "Invalid file"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn upload_file(
    RequireAdmin(_actor): RequireAdmin,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let mut file: Option<(String, String, axum::body::Bytes)> = None;
    let mut declared_kind: Option<String> = None;

    // Fields arrive in client order; collect both before validating.
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("Invalid multipart payload: {e}")))?
    {
        // Take an owned copy of the field name up front: reading the field
        // body consumes it.
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let original_name = field.file_name().unwrap_or("upload.bin").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(format!("Failed to read file: {e}")))?;
                file = Some((original_name, content_type, data));
            }
            Some("type") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::validation(format!("Failed to read type: {e}")))?;
                declared_kind = Some(value);
            }
            _ => {}
        }
    }

    let (original_name, content_type, data) =
        file.ok_or_else(|| AppError::validation("No file provided"))?;
    let kind = declared_kind
        .as_deref()
        .and_then(UploadKind::parse)
        .ok_or_else(|| AppError::validation("Invalid file type specified"))?;

    upload::validate_mime(kind, &content_type)?;
    upload::validate_size(data.len())?;

    let filename = upload::unique_filename(&original_name);
    let file_url = state.storage.store(kind, &filename, &data).await?;

    Ok(Json(UploadResponse {
        success: true,
        file_url,
        file_name: original_name,
        file_size: data.len() as u64,
    }))
}

// --- Auth Handlers ---

/// register_user
///
/// [Public Route] Registers a credentials user. The password is hashed with
/// Argon2id before it reaches the store; emails on the configured admin
/// allow-list receive the ADMIN role, everyone else is a USER. No session
/// or token is issued here.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = User),
        (status = 400, description = "Invalid data or duplicate email")
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<User>>)> {
    payload.validate()?;

    let email = payload.email.trim().to_lowercase();

    // Fast-path duplicate check; the unique constraint still decides under
    // concurrency and create_user maps that to the same conflict.
    if state.repo.get_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let role = if auth::is_admin_email(&email, &state.config.admin_emails) {
        ROLE_ADMIN
    } else {
        ROLE_USER
    };

    let user = User {
        id: Uuid::new_v4(),
        email,
        name: payload.name.clone(),
        password_hash: Some(auth::password::hash_password(&payload.password)?),
        role: role.to_string(),
    };

    let created = state.repo.create_user(user).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(created))))
}
