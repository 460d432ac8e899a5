use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use central_hub::{
    AppConfig, AppState, MockStorageService, create_router,
    auth::{AuthUser, Claims, ensure_admin},
    error::{AppError, AppResult},
    models::{
        Category, CategorySummary, CreateCategoryRequest, CreateResourceRequest, ROLE_ADMIN,
        ROLE_USER, Resource, ResourceFilter, UpdateCategoryRequest, User,
    },
    repository::{Repository, RepositoryState},
    slug::{self, SlugIndex},
};
use serde_json::{Value, json};
use tower::util::ServiceExt;
use uuid::Uuid;

// --- In-Memory Repository ---
//
// A full working implementation of the Repository contract over Vecs, so
// the handler stack (routing, auth bypass, envelopes, guards) can be
// exercised end-to-end without a database. It enforces the same actor
// checks and hierarchy invariants as the Postgres implementation.

#[derive(Default)]
struct InMemoryRepository {
    categories: Mutex<Vec<Category>>,
    resources: Mutex<Vec<Resource>>,
    users: Mutex<Vec<User>>,
    next_category_id: AtomicI64,
}

impl InMemoryRepository {
    fn seed_user(&self, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.users.lock().unwrap().push(User {
            id,
            email: format!("{}@test.local", id.simple()),
            name: None,
            password_hash: None,
            role: role.to_string(),
        });
        id
    }

    /// Recomputes the dependent counts for a category snapshot. Must be
    /// called with no repository locks held.
    fn recount(&self, mut category: Category) -> Category {
        category.children_count = self
            .categories
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.parent_id == Some(category.id))
            .count() as i64;
        category.resource_count = self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.categories.iter().any(|c| c.id == category.id))
            .count() as i64;
        category
    }

    fn category_summaries(&self, ids: &[i64]) -> Vec<CategorySummary> {
        let categories = self.categories.lock().unwrap();
        ids.iter()
            .filter_map(|id| {
                categories.iter().find(|c| c.id == *id).map(|c| CategorySummary {
                    id: c.id,
                    name: c.name.clone(),
                    slug: c.slug.clone(),
                })
            })
            .collect()
    }

    fn verify_category_ids(&self, ids: &[i64]) -> AppResult<()> {
        let categories = self.categories.lock().unwrap();
        let all_exist = ids
            .iter()
            .all(|id| categories.iter().any(|c| c.id == *id));
        if !all_exist {
            return Err(AppError::validation("One or more categories do not exist"));
        }
        Ok(())
    }
}

#[async_trait]
impl SlugIndex for InMemoryRepository {
    async fn slug_in_use(&self, slug: &str, exclude_id: Option<i64>) -> AppResult<bool> {
        Ok(self
            .categories
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.slug == slug && exclude_id != Some(c.id)))
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_categories(&self) -> AppResult<Vec<Category>> {
        let mut categories: Vec<Category> = self.categories.lock().unwrap().clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories
            .into_iter()
            .map(|c| self.recount(c))
            .collect())
    }

    async fn get_category(&self, id: i64) -> AppResult<Option<Category>> {
        let found = self
            .categories
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned();
        Ok(found.map(|c| self.recount(c)))
    }

    async fn create_category(
        &self,
        actor: &AuthUser,
        req: CreateCategoryRequest,
    ) -> AppResult<Category> {
        ensure_admin(actor)?;

        if let Some(parent_id) = req.parent_id {
            if self.get_category(parent_id).await?.is_none() {
                return Err(AppError::validation("Parent category not found"));
            }
        }

        let slug = slug::resolve_unique(self, &req.name, None).await?;
        let id = self.next_category_id.fetch_add(1, Ordering::SeqCst) + 1;

        let category = Category {
            id,
            name: req.name,
            description: req.description,
            slug,
            parent_id: req.parent_id,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            ..Default::default()
        };
        self.categories.lock().unwrap().push(category.clone());
        Ok(self.recount(category))
    }

    async fn update_category(
        &self,
        actor: &AuthUser,
        id: i64,
        req: UpdateCategoryRequest,
    ) -> AppResult<Category> {
        ensure_admin(actor)?;

        let existing = self
            .get_category(id)
            .await?
            .ok_or(AppError::NotFound("Category"))?;

        if let Some(Some(parent_id)) = req.parent_id {
            if parent_id == id {
                return Err(AppError::Conflict(
                    "Category cannot be its own parent".into(),
                ));
            }
            if self.get_category(parent_id).await?.is_none() {
                return Err(AppError::validation("Parent category not found"));
            }
        }

        let name = req.name.unwrap_or_else(|| existing.name.clone());
        let slug = if name != existing.name {
            slug::resolve_unique(self, &name, Some(id)).await?
        } else {
            existing.slug.clone()
        };

        let mut categories = self.categories.lock().unwrap();
        let entry = categories
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(AppError::NotFound("Category"))?;
        entry.name = name;
        entry.slug = slug;
        if let Some(description) = req.description {
            entry.description = description;
        }
        if let Some(parent_id) = req.parent_id {
            entry.parent_id = parent_id;
        }
        entry.updated_at = chrono::Utc::now();
        let updated = entry.clone();
        drop(categories);

        Ok(self.recount(updated))
    }

    async fn delete_category(&self, actor: &AuthUser, id: i64) -> AppResult<()> {
        ensure_admin(actor)?;

        let category = self
            .get_category(id)
            .await?
            .ok_or(AppError::NotFound("Category"))?;

        if category.children_count > 0 {
            return Err(AppError::Conflict(
                "Cannot delete category with subcategories".into(),
            ));
        }
        if category.resource_count > 0 {
            return Err(AppError::Conflict(format!(
                "Cannot delete category with {} associated resources",
                category.resource_count
            )));
        }

        self.categories.lock().unwrap().retain(|c| c.id != id);
        Ok(())
    }

    async fn category_slug_in_use(&self, slug: &str, exclude_id: Option<i64>) -> AppResult<bool> {
        SlugIndex::slug_in_use(self, slug, exclude_id).await
    }

    async fn list_resources(&self, filter: ResourceFilter) -> AppResult<(Vec<Resource>, i64)> {
        let matches_search = |resource: &Resource, needle: &str| {
            let needle = needle.to_lowercase();
            let haystacks = [
                Some(resource.title_ro.as_str()),
                resource.title_en.as_deref(),
                resource.description_ro.as_deref(),
                resource.description_en.as_deref(),
            ];
            haystacks
                .into_iter()
                .flatten()
                .any(|text| text.to_lowercase().contains(&needle))
        };

        let mut resources: Vec<Resource> = self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                filter
                    .category_id
                    .is_none_or(|id| r.categories.iter().any(|c| c.id == id))
            })
            .filter(|r| {
                filter
                    .resource_type
                    .as_deref()
                    .is_none_or(|t| r.resource_type == t)
            })
            .filter(|r| {
                filter
                    .store_association
                    .as_deref()
                    .is_none_or(|s| r.store_association.as_deref() == Some(s))
            })
            .filter(|r| filter.search.as_deref().is_none_or(|s| matches_search(r, s)))
            .cloned()
            .collect();

        resources.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = resources.len() as i64;
        let start = ((filter.page() - 1) * filter.limit()) as usize;
        let page: Vec<Resource> = resources
            .into_iter()
            .skip(start)
            .take(filter.limit() as usize)
            .collect();

        Ok((page, total))
    }

    async fn get_resource(&self, id: Uuid) -> AppResult<Option<Resource>> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn create_resource(
        &self,
        actor: &AuthUser,
        req: CreateResourceRequest,
    ) -> AppResult<Resource> {
        ensure_admin(actor)?;
        self.verify_category_ids(&req.category_ids)?;

        let resource = Resource {
            id: Uuid::new_v4(),
            title: req.title_ro.clone(),
            description: req.description_ro.clone().filter(|d| !d.is_empty()),
            title_ro: req.title_ro,
            title_en: req.title_en,
            description_ro: req.description_ro,
            description_en: req.description_en,
            resource_type: req.source.type_str().to_string(),
            file_url: req.source.file_url().map(str::to_string),
            external_link: req.source.external_link().map(str::to_string),
            thumbnail_url: req.thumbnail_url,
            store_association: req.store_association,
            categories: self.category_summaries(&req.category_ids),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        self.resources.lock().unwrap().push(resource.clone());
        Ok(resource)
    }

    async fn update_resource(
        &self,
        actor: &AuthUser,
        id: Uuid,
        req: CreateResourceRequest,
    ) -> AppResult<Resource> {
        ensure_admin(actor)?;

        if self.get_resource(id).await?.is_none() {
            return Err(AppError::NotFound("Resource"));
        }
        self.verify_category_ids(&req.category_ids)?;

        let categories = self.category_summaries(&req.category_ids);
        let mut resources = self.resources.lock().unwrap();
        let entry = resources
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(AppError::NotFound("Resource"))?;

        entry.title = req.title_ro.clone();
        entry.description = req.description_ro.clone().filter(|d| !d.is_empty());
        entry.title_ro = req.title_ro;
        entry.title_en = req.title_en;
        entry.description_ro = req.description_ro;
        entry.description_en = req.description_en;
        entry.resource_type = req.source.type_str().to_string();
        entry.file_url = req.source.file_url().map(str::to_string);
        entry.external_link = req.source.external_link().map(str::to_string);
        entry.thumbnail_url = req.thumbnail_url;
        entry.store_association = req.store_association;
        entry.categories = categories;
        entry.updated_at = chrono::Utc::now();

        Ok(entry.clone())
    }

    async fn delete_resource(&self, actor: &AuthUser, id: Uuid) -> AppResult<()> {
        ensure_admin(actor)?;

        let mut resources = self.resources.lock().unwrap();
        let before = resources.len();
        resources.retain(|r| r.id != id);
        if resources.len() == before {
            return Err(AppError::NotFound("Resource"));
        }
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create_user(&self, user: User) -> AppResult<User> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == user.email) {
            return Err(AppError::Conflict("Email already registered".into()));
        }
        users.push(user.clone());
        Ok(user)
    }
}

// --- Test Harness ---

fn test_app() -> (Router, Arc<InMemoryRepository>) {
    let repo = Arc::new(InMemoryRepository::default());
    let state = AppState {
        repo: repo.clone() as RepositoryState,
        storage: Arc::new(MockStorageService::new()),
        config: AppConfig::default(),
    };
    (create_router(state), repo)
}

/// Runs a request through the router and returns the status plus the
/// parsed JSON body (or the raw text for non-JSON responses).
async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

fn json_request(method: &str, uri: &str, user: Option<Uuid>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        // The Env::Local auth bypass resolves this header against the
        // repository, the same path the development workflow uses.
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn create_category(app: &Router, admin: Uuid, name: &str, parent: Option<i64>) -> Value {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/categories",
            Some(admin),
            json!({ "name": name, "parentId": parent }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create category failed: {body}");
    body["data"].clone()
}

// --- Health & Auth Boundary ---

#[tokio::test]
async fn health_check_responds() {
    let (app, _) = test_app();
    let (status, _) = send(&app, get_request("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn anonymous_mutation_is_rejected() {
    let (app, _) = test_app();
    let (status, body) = send(
        &app,
        json_request("POST", "/categories", None, json!({ "name": "Matematică" })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn non_admin_mutation_is_rejected_with_generic_denial() {
    let (app, repo) = test_app();
    let user = repo.seed_user(ROLE_USER);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/categories",
            Some(user),
            json!({ "name": "Matematică" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    // The denial must not reveal whether the problem was the session or
    // the role.
    assert_eq!(body["error"], json!("Unauthorized"));
}

#[tokio::test]
async fn store_accessor_rejects_non_admin_actor_directly() {
    // The role check must hold even when the HTTP guard is bypassed
    // entirely and the accessor is called with a non-admin actor.
    let (_, repo) = test_app();
    let actor = AuthUser {
        id: Uuid::new_v4(),
        role: ROLE_USER.to_string(),
    };

    let result = repo
        .create_category(
            &actor,
            CreateCategoryRequest {
                name: "Istorie".into(),
                ..Default::default()
            },
        )
        .await;

    assert!(matches!(result, Err(AppError::Unauthorized)));
}

#[tokio::test]
async fn bearer_token_authenticates_against_the_shared_secret() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: admin,
        exp: (now + 3600) as usize,
        iat: now as usize,
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(AppConfig::default().jwt_secret.as_bytes()),
    )
    .unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/categories")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(json!({ "name": "Geografie" }).to_string()))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::CREATED, "bearer auth failed: {body}");
    assert_eq!(body["data"]["slug"], json!("geografie"));
}

// --- Category Lifecycle ---

#[tokio::test]
async fn category_create_derives_and_deduplicates_slugs() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let first = create_category(&app, admin, "Matematică & Fizică", None).await;
    assert_eq!(first["slug"], json!("matematica-fizica"));

    let second = create_category(&app, admin, "Matematică & Fizică", None).await;
    assert_eq!(second["slug"], json!("matematica-fizica-1"));
}

#[tokio::test]
async fn category_create_rejects_missing_parent() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/categories",
            Some(admin),
            json!({ "name": "Algebra", "parentId": 999 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Parent category not found"));
}

#[tokio::test]
async fn category_listing_nests_children_on_request() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let parent = create_category(&app, admin, "Matematică", None).await;
    let parent_id = parent["id"].as_i64().unwrap();
    create_category(&app, admin, "Algebra", Some(parent_id)).await;
    create_category(&app, admin, "Geometrie", Some(parent_id)).await;

    // Flat listing: three rows, parent counts its children.
    let (status, flat) = send(&app, get_request("/categories")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(flat["data"].as_array().unwrap().len(), 3);
    let parent_row = flat["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["id"].as_i64() == Some(parent_id))
        .unwrap();
    assert_eq!(parent_row["childrenCount"], json!(2));

    // Nested listing: one root with two children inline.
    let (status, nested) = send(&app, get_request("/categories?includeChildren=true")).await;
    assert_eq!(status, StatusCode::OK);
    let roots = nested["data"].as_array().unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0]["children"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn category_update_regenerates_slug_only_on_rename() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let category = create_category(&app, admin, "Istorie", None).await;
    let id = category["id"].as_i64().unwrap();

    // Description-only update keeps the slug.
    let (status, body) = send(
        &app,
        json_request(
            "PATCH",
            &format!("/categories/{id}"),
            Some(admin),
            json!({ "description": "Materiale de istorie" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["slug"], json!("istorie"));

    // Rename regenerates it.
    let (status, body) = send(
        &app,
        json_request(
            "PATCH",
            &format!("/categories/{id}"),
            Some(admin),
            json!({ "name": "Istoria României" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["slug"], json!("istoria-romaniei"));
}

#[tokio::test]
async fn category_cannot_become_its_own_parent() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let category = create_category(&app, admin, "Fizică", None).await;
    let id = category["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        json_request(
            "PATCH",
            &format!("/categories/{id}"),
            Some(admin),
            json!({ "parentId": id }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Category cannot be its own parent"));
}

#[tokio::test]
async fn category_delete_is_guarded_by_dependents() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let parent = create_category(&app, admin, "Științe", None).await;
    let parent_id = parent["id"].as_i64().unwrap();
    let child = create_category(&app, admin, "Chimie", Some(parent_id)).await;
    let child_id = child["id"].as_i64().unwrap();

    // Parent with a child: refused.
    let (status, body) = send(
        &app,
        json_request(
            "DELETE",
            &format!("/categories/{parent_id}"),
            Some(admin),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        json!("Cannot delete category with subcategories")
    );

    // Child with a resource: refused.
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/resources",
            Some(admin),
            json!({
                "titleRo": "Experimente",
                "type": "pdf",
                "fileUrl": "/uploads/pdf/experimente_1_x.pdf",
                "categoryIds": [child_id]
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        json_request(
            "DELETE",
            &format!("/categories/{child_id}"),
            Some(admin),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("associated resources")
    );

    // Drop the resource, then both deletes succeed bottom-up.
    let (_, listing) = send(&app, get_request("/resources")).await;
    let resource_id = listing["data"][0]["id"].as_str().unwrap().to_string();
    let (status, _) = send(
        &app,
        json_request(
            "DELETE",
            &format!("/resources/{resource_id}"),
            Some(admin),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    for id in [child_id, parent_id] {
        let (status, body) = send(
            &app,
            json_request("DELETE", &format!("/categories/{id}"), Some(admin), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "delete of {id} failed: {body}");
        assert_eq!(body["success"], json!(true));
    }
}

#[tokio::test]
async fn unknown_category_returns_404() {
    let (app, _) = test_app();
    let (status, body) = send(&app, get_request("/categories/4242")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("Category not found"));
}

// --- Resource Lifecycle ---

#[tokio::test]
async fn resource_create_mirrors_romanian_fields_into_display_columns() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let category = create_category(&app, admin, "Matematică", None).await;
    let category_id = category["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/resources",
            Some(admin),
            json!({
                "titleRo": "Culegere de algebră",
                "titleEn": "Algebra workbook",
                "descriptionRo": "Probleme rezolvate",
                "type": "pdf",
                "fileUrl": "/uploads/pdf/culegere_1_x.pdf",
                "categoryIds": [category_id]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    assert_eq!(body["data"]["title"], json!("Culegere de algebră"));
    assert_eq!(body["data"]["description"], json!("Probleme rezolvate"));
    assert_eq!(body["data"]["type"], json!("pdf"));
    assert_eq!(body["data"]["categories"][0]["id"], json!(category_id));
}

#[tokio::test]
async fn resource_create_rejects_unknown_categories() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/resources",
            Some(admin),
            json!({
                "titleRo": "Culegere",
                "type": "pdf",
                "fileUrl": "/uploads/pdf/culegere_1_x.pdf",
                "categoryIds": [404]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("One or more categories do not exist"));
}

#[tokio::test]
async fn resource_payload_without_required_source_is_a_client_error() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    // pdf with no fileUrl cannot be expressed by the tagged payload; the
    // request dies at the deserialization boundary.
    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/resources",
            Some(admin),
            json!({ "titleRo": "Culegere", "type": "pdf", "categoryIds": [1] }),
        ),
    )
    .await;
    assert!(status.is_client_error(), "got {status}");
}

#[tokio::test]
async fn resource_listing_paginates_and_searches() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let category = create_category(&app, admin, "Lecturi", None).await;
    let category_id = category["id"].as_i64().unwrap();

    for (title, kind, source) in [
        ("Amintiri din copilărie", "pdf", "fileUrl"),
        ("Lecții video de gramatică", "video", "fileUrl"),
        ("Librăria online", "link", "externalLink"),
    ] {
        let source_value = if source == "fileUrl" {
            format!("/uploads/{kind}/{kind}_1_x.bin")
        } else {
            "https://store.example.com".to_string()
        };
        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/resources",
                Some(admin),
                json!({
                    "titleRo": title,
                    "type": kind,
                    source: source_value,
                    "categoryIds": [category_id]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "seed failed: {body}");
    }

    // Pagination metadata covers the full filtered set.
    let (status, body) = send(&app, get_request("/resources?page=1&limit=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], json!(3));
    assert_eq!(body["pagination"]["totalPages"], json!(2));
    assert_eq!(body["pagination"]["limit"], json!(2));

    // Type filter.
    let (_, body) = send(&app, get_request("/resources?type=video")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["type"], json!("video"));

    // Unknown type values are ignored, not rejected.
    let (status, body) = send(&app, get_request("/resources?type=hologram")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], json!(3));

    // Free-text search over the Romanian title.
    let (_, body) = send(&app, get_request("/resources?search=copil%C4%83rie")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["titleRo"], json!("Amintiri din copilărie"));
}

#[tokio::test]
async fn resource_update_replaces_category_associations() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let first = create_category(&app, admin, "Matematică", None).await;
    let second = create_category(&app, admin, "Fizică", None).await;
    let first_id = first["id"].as_i64().unwrap();
    let second_id = second["id"].as_i64().unwrap();

    let (_, created) = send(
        &app,
        json_request(
            "POST",
            "/resources",
            Some(admin),
            json!({
                "titleRo": "Formule",
                "type": "image",
                "fileUrl": "/uploads/image/formule_1_x.png",
                "categoryIds": [first_id]
            }),
        ),
    )
    .await;
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        json_request(
            "PATCH",
            &format!("/resources/{id}"),
            Some(admin),
            json!({
                "titleRo": "Formule esențiale",
                "type": "image",
                "fileUrl": "/uploads/image/formule_1_x.png",
                "categoryIds": [second_id]
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "update failed: {body}");
    let categories = body["data"]["categories"].as_array().unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0]["id"], json!(second_id));
    assert_eq!(body["data"]["title"], json!("Formule esențiale"));
}

#[tokio::test]
async fn unknown_resource_returns_404() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let missing = Uuid::new_v4();
    let (status, _) = send(&app, get_request(&format!("/resources/{missing}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        json_request(
            "DELETE",
            &format!("/resources/{missing}"),
            Some(admin),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// --- Upload ---

fn multipart_request(user: Option<Uuid>, kind: &str, filename: &str, content_type: &str) -> Request<Body> {
    let boundary = "central-hub-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"type\"\r\n\r\n\
         {kind}\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: {content_type}\r\n\r\n\
         %PDF-1.4 fake content\r\n\
         --{boundary}--\r\n"
    );

    let mut builder = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        );
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn upload_stores_under_the_declared_kind() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let (status, body) = send(
        &app,
        multipart_request(Some(admin), "pdf", "lesson plan.pdf", "application/pdf"),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "upload failed: {body}");
    assert_eq!(body["success"], json!(true));
    let file_url = body["fileUrl"].as_str().unwrap();
    assert!(file_url.starts_with("/uploads/pdf/lesson_plan_"), "got {file_url}");
    assert!(file_url.ends_with(".pdf"));
    assert_eq!(body["fileName"], json!("lesson plan.pdf"));
    assert!(body["fileSize"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn upload_rejects_mismatched_mime() {
    let (app, repo) = test_app();
    let admin = repo.seed_user(ROLE_ADMIN);

    let (status, body) = send(
        &app,
        multipart_request(Some(admin), "pdf", "script.exe", "application/x-msdownload"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Invalid file format for pdf"));
}

#[tokio::test]
async fn upload_requires_admin() {
    let (app, repo) = test_app();
    let user = repo.seed_user(ROLE_USER);

    let (status, _) = send(
        &app,
        multipart_request(Some(user), "pdf", "doc.pdf", "application/pdf"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, multipart_request(None, "pdf", "doc.pdf", "application/pdf")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// --- Registration ---

#[tokio::test]
async fn registration_assigns_roles_from_the_allow_list() {
    let (app, _) = test_app();

    // The default test config allow-lists admin@test.local.
    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/auth/register",
            None,
            json!({ "email": "admin@test.local", "password": "parola-sigura" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    assert_eq!(body["data"]["role"], json!("ADMIN"));

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/auth/register",
            None,
            json!({ "email": "elev@example.com", "password": "parola-sigura" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["role"], json!("USER"));

    // The response never carries hash material.
    assert!(body["data"].get("passwordHash").is_none());
    assert!(body["data"].get("password_hash").is_none());
}

#[tokio::test]
async fn registration_rejects_duplicate_emails() {
    let (app, _) = test_app();

    let payload = json!({ "email": "dublu@example.com", "password": "parola-sigura" });
    let (status, _) = send(&app, json_request("POST", "/auth/register", None, payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, json_request("POST", "/auth/register", None, payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Email already registered"));
}
