use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, query_builder::QueryBuilder};
use uuid::Uuid;

use crate::auth::{AuthUser, ensure_admin};
use crate::error::{AppError, AppResult, is_unique_violation};
use crate::models::{
    Category, CategorySummary, CreateCategoryRequest, CreateResourceRequest, RESOURCE_TYPES,
    Resource, ResourceFilter, STORE_ASSOCIATIONS, UpdateCategoryRequest, User,
};
use crate::slug::{self, SlugIndex};

/// How many times an insert is retried when the slug unique constraint
/// fires between the probe and the write.
const SLUG_INSERT_ATTEMPTS: u32 = 3;

/// Repository Trait
///
/// The abstract contract for all persistence operations, letting handlers
/// and tests work against the data layer without knowing the concrete
/// implementation (Postgres, in-memory, ...).
///
/// Every mutating operation takes the authenticated actor explicitly and
/// must reject non-ADMIN actors, independent of any route-level guard.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Categories ---

    /// Flat category listing, name-ascending, with dependent counts.
    async fn list_categories(&self) -> AppResult<Vec<Category>>;
    async fn get_category(&self, id: i64) -> AppResult<Option<Category>>;
    /// Admin: create a category; the slug is derived from the name.
    async fn create_category(
        &self,
        actor: &AuthUser,
        req: CreateCategoryRequest,
    ) -> AppResult<Category>;
    /// Admin: partial update; the slug is regenerated only on a name change.
    async fn update_category(
        &self,
        actor: &AuthUser,
        id: i64,
        req: UpdateCategoryRequest,
    ) -> AppResult<Category>;
    /// Admin: delete, refused while subcategories or resources depend on it.
    async fn delete_category(&self, actor: &AuthUser, id: i64) -> AppResult<()>;
    /// Probe for the uniqueness resolver; `exclude_id` hides the record
    /// being updated.
    async fn category_slug_in_use(&self, slug: &str, exclude_id: Option<i64>) -> AppResult<bool>;

    // --- Resources ---

    /// Filtered, paginated listing. Returns the page plus the total row
    /// count across all pages.
    async fn list_resources(&self, filter: ResourceFilter) -> AppResult<(Vec<Resource>, i64)>;
    async fn get_resource(&self, id: Uuid) -> AppResult<Option<Resource>>;
    /// Admin: create a resource and its category links.
    async fn create_resource(
        &self,
        actor: &AuthUser,
        req: CreateResourceRequest,
    ) -> AppResult<Resource>;
    /// Admin: full-payload update, replacing the category links.
    async fn update_resource(
        &self,
        actor: &AuthUser,
        id: Uuid,
        req: CreateResourceRequest,
    ) -> AppResult<Resource>;
    /// Admin: delete the resource; its links go with it, the uploaded file
    /// stays on disk (cleanup is deliberately deferred).
    async fn delete_resource(&self, actor: &AuthUser, id: Uuid) -> AppResult<()>;

    // --- Users ---

    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
    async fn create_user(&self, user: User) -> AppResult<User>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the
/// application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by the
/// PostgreSQL database.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Validates that every referenced category id exists. A count mismatch
    /// (including duplicate ids in the input) is a validation failure.
    async fn verify_category_ids(&self, category_ids: &[i64]) -> AppResult<()> {
        let found: i64 = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM categories WHERE id = ANY($1)",
        )
        .bind(category_ids)
        .fetch_one(&self.pool)
        .await?;

        if found != category_ids.len() as i64 {
            return Err(AppError::validation("One or more categories do not exist"));
        }
        Ok(())
    }

    /// Loads the category summaries for a batch of resources in one query
    /// and distributes them onto the rows.
    async fn attach_categories(&self, resources: &mut [Resource]) -> AppResult<()> {
        if resources.is_empty() {
            return Ok(());
        }

        let ids: Vec<Uuid> = resources.iter().map(|r| r.id).collect();
        let rows: Vec<(Uuid, i64, String, String)> = sqlx::query_as(
            r#"
            SELECT rc.resource_id, c.id, c.name, c.slug
            FROM resource_categories rc
            JOIN categories c ON c.id = rc.category_id
            WHERE rc.resource_id = ANY($1)
            ORDER BY c.name ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_resource: HashMap<Uuid, Vec<CategorySummary>> = HashMap::new();
        for (resource_id, id, name, slug) in rows {
            by_resource
                .entry(resource_id)
                .or_default()
                .push(CategorySummary { id, name, slug });
        }

        for resource in resources {
            resource.categories = by_resource.remove(&resource.id).unwrap_or_default();
        }
        Ok(())
    }
}

// Category rows are always selected with their dependent counts: the
// listing shows them and the delete guard decides on them.
const CATEGORY_SELECT: &str = r#"
    SELECT c.id, c.name, c.description, c.slug, c.parent_id, c.created_at, c.updated_at,
           (SELECT COUNT(*) FROM resource_categories rc WHERE rc.category_id = c.id) AS resource_count,
           (SELECT COUNT(*) FROM categories ch WHERE ch.parent_id = c.id) AS children_count
    FROM categories c
"#;

const RESOURCE_COLUMNS: &str = r#"r.id, r.title, r.description, r.title_ro, r.title_en,
    r.description_ro, r.description_en, r.type, r.file_url, r.external_link,
    r.thumbnail_url, r.store_association, r.created_at, r.updated_at"#;

#[async_trait]
impl SlugIndex for PostgresRepository {
    async fn slug_in_use(&self, slug: &str, exclude_id: Option<i64>) -> AppResult<bool> {
        self.category_slug_in_use(slug, exclude_id).await
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- CATEGORY ACCESSOR ---

    /// list_categories
    ///
    /// The flat hierarchy in name order; the tree builder runs client-side
    /// over exactly this shape.
    async fn list_categories(&self) -> AppResult<Vec<Category>> {
        let sql = format!("{CATEGORY_SELECT} ORDER BY c.name ASC");
        Ok(sqlx::query_as::<_, Category>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    /// get_category
    ///
    /// Single category with counts; None when the id does not exist.
    async fn get_category(&self, id: i64) -> AppResult<Option<Category>> {
        let sql = format!("{CATEGORY_SELECT} WHERE c.id = $1");
        Ok(sqlx::query_as::<_, Category>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// create_category
    ///
    /// Validates the parent reference, resolves a free slug, and inserts.
    /// The slug probe races concurrent creates, so the unique constraint is
    /// the authority: a conflict re-resolves and retries a bounded number
    /// of times before giving up.
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

        for attempt in 1..=SLUG_INSERT_ATTEMPTS {
            let slug = slug::resolve_unique(self, &req.name, None).await?;

            let inserted = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO categories (name, description, slug, parent_id)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(&req.name)
            .bind(&req.description)
            .bind(&slug)
            .bind(req.parent_id)
            .fetch_one(&self.pool)
            .await;

            match inserted {
                Ok(id) => {
                    return self
                        .get_category(id)
                        .await?
                        .ok_or_else(|| AppError::Storage("category missing after insert".into()));
                }
                Err(e)
                    if is_unique_violation(&e, "categories_slug_key")
                        && attempt < SLUG_INSERT_ATTEMPTS =>
                {
                    // Lost the race for this slug; resolve again.
                    tracing::warn!(slug = %slug, attempt, "slug conflict on insert, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Storage("slug conflict retries exhausted".into()))
    }

    /// update_category
    ///
    /// Partial update. Rejects self-parenting and dangling parents, and
    /// regenerates the slug only when the name actually changes (the probe
    /// excludes this record, so renaming to the same name is a no-op).
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
        let description = match req.description {
            Some(description) => description,
            None => existing.description.clone(),
        };
        let parent_id = match req.parent_id {
            Some(parent_id) => parent_id,
            None => existing.parent_id,
        };

        let updated = sqlx::query(
            r#"
            UPDATE categories
            SET name = $2, description = $3, slug = $4, parent_id = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&name)
        .bind(&description)
        .bind(&slug)
        .bind(parent_id)
        .execute(&self.pool)
        .await;

        if let Err(e) = updated {
            if is_unique_violation(&e, "categories_slug_key") {
                return Err(AppError::Conflict("Slug already in use".into()));
            }
            return Err(e.into());
        }

        self.get_category(id)
            .await?
            .ok_or_else(|| AppError::Storage("category missing after update".into()))
    }

    /// delete_category
    ///
    /// Refuses while subcategories or linked resources exist; the foreign
    /// keys back this up at the storage layer.
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

        sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// category_slug_in_use
    ///
    /// The uniqueness probe over the slug column.
    async fn category_slug_in_use(&self, slug: &str, exclude_id: Option<i64>) -> AppResult<bool> {
        let taken: bool = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM categories
                WHERE slug = $1 AND ($2::BIGINT IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(slug)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    // --- RESOURCE ACCESSOR ---

    /// list_resources
    ///
    /// Filtering and search via QueryBuilder for safe parameterization; the
    /// same WHERE clause feeds both the count and the page query. Unknown
    /// type/store values are ignored, matching the public contract.
    async fn list_resources(&self, filter: ResourceFilter) -> AppResult<(Vec<Resource>, i64)> {
        fn push_filters(builder: &mut QueryBuilder<'_, sqlx::Postgres>, filter: &ResourceFilter) {
            if let Some(category_id) = filter.category_id {
                builder.push(
                    " AND EXISTS (SELECT 1 FROM resource_categories rc \
                     WHERE rc.resource_id = r.id AND rc.category_id = ",
                );
                builder.push_bind(category_id);
                builder.push(")");
            }

            if let Some(resource_type) = &filter.resource_type {
                if RESOURCE_TYPES.contains(&resource_type.as_str()) {
                    builder.push(" AND r.type = ");
                    builder.push_bind(resource_type.clone());
                }
            }

            if let Some(store) = &filter.store_association {
                if STORE_ASSOCIATIONS.contains(&store.as_str()) {
                    builder.push(" AND r.store_association = ");
                    builder.push_bind(store.clone());
                }
            }

            if let Some(search) = &filter.search {
                // Case-insensitive search across both languages' titles and
                // descriptions.
                let pattern = format!("%{search}%");
                builder.push(" AND (r.title_ro ILIKE ");
                builder.push_bind(pattern.clone());
                builder.push(" OR r.title_en ILIKE ");
                builder.push_bind(pattern.clone());
                builder.push(" OR r.description_ro ILIKE ");
                builder.push_bind(pattern.clone());
                builder.push(" OR r.description_en ILIKE ");
                builder.push_bind(pattern);
                builder.push(")");
            }
        }

        let page = filter.page();
        let limit = filter.limit();

        let mut count_builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM resources r WHERE 1=1");
        push_filters(&mut count_builder, &filter);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut select_builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new(format!("SELECT {RESOURCE_COLUMNS} FROM resources r WHERE 1=1"));
        push_filters(&mut select_builder, &filter);
        select_builder.push(" ORDER BY r.created_at DESC LIMIT ");
        select_builder.push_bind(limit);
        select_builder.push(" OFFSET ");
        select_builder.push_bind((page - 1) * limit);

        let mut resources: Vec<Resource> = select_builder
            .build_query_as::<Resource>()
            .fetch_all(&self.pool)
            .await?;

        self.attach_categories(&mut resources).await?;
        Ok((resources, total))
    }

    /// get_resource
    ///
    /// Single resource with its category summaries.
    async fn get_resource(&self, id: Uuid) -> AppResult<Option<Resource>> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources r WHERE r.id = $1");
        let resource = sqlx::query_as::<_, Resource>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match resource {
            Some(mut resource) => {
                self.attach_categories(std::slice::from_mut(&mut resource))
                    .await?;
                Ok(Some(resource))
            }
            None => Ok(None),
        }
    }

    /// create_resource
    ///
    /// Inserts the row and its category links in one transaction. The
    /// Romanian title/description are mirrored into the display columns.
    async fn create_resource(
        &self,
        actor: &AuthUser,
        req: CreateResourceRequest,
    ) -> AppResult<Resource> {
        ensure_admin(actor)?;
        self.verify_category_ids(&req.category_ids).await?;

        let id = Uuid::new_v4();
        let display_description = req.description_ro.clone().filter(|d| !d.is_empty());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO resources
                (id, title, description, title_ro, title_en, description_ro,
                 description_en, type, file_url, external_link, thumbnail_url,
                 store_association)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(id)
        .bind(&req.title_ro)
        .bind(&display_description)
        .bind(&req.title_ro)
        .bind(&req.title_en)
        .bind(&req.description_ro)
        .bind(&req.description_en)
        .bind(req.source.type_str())
        .bind(req.source.file_url())
        .bind(req.source.external_link())
        .bind(&req.thumbnail_url)
        .bind(&req.store_association)
        .execute(&mut *tx)
        .await?;

        for category_id in &req.category_ids {
            sqlx::query(
                "INSERT INTO resource_categories (resource_id, category_id) \
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(category_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_resource(id)
            .await?
            .ok_or_else(|| AppError::Storage("resource missing after insert".into()))
    }

    /// update_resource
    ///
    /// Full-payload update: the row is rewritten and the category links are
    /// replaced wholesale, in one transaction.
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
        self.verify_category_ids(&req.category_ids).await?;

        let display_description = req.description_ro.clone().filter(|d| !d.is_empty());

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE resources
            SET title = $2, description = $3, title_ro = $4, title_en = $5,
                description_ro = $6, description_en = $7, type = $8,
                file_url = $9, external_link = $10, thumbnail_url = $11,
                store_association = $12, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&req.title_ro)
        .bind(&display_description)
        .bind(&req.title_ro)
        .bind(&req.title_en)
        .bind(&req.description_ro)
        .bind(&req.description_en)
        .bind(req.source.type_str())
        .bind(req.source.file_url())
        .bind(req.source.external_link())
        .bind(&req.thumbnail_url)
        .bind(&req.store_association)
        .execute(&mut *tx)
        .await?;

        // Clear and recreate the associations.
        sqlx::query("DELETE FROM resource_categories WHERE resource_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for category_id in &req.category_ids {
            sqlx::query(
                "INSERT INTO resource_categories (resource_id, category_id) \
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(category_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_resource(id)
            .await?
            .ok_or_else(|| AppError::Storage("resource missing after update".into()))
    }

    /// delete_resource
    ///
    /// Removes the row; the join rows cascade. The uploaded file stays on
    /// disk (cleanup is deferred, orphans are accepted).
    async fn delete_resource(&self, actor: &AuthUser, id: Uuid) -> AppResult<()> {
        ensure_admin(actor)?;

        let deleted = sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound("Resource"));
        }
        Ok(())
    }

    // --- USER ACCESSOR ---

    /// get_user
    ///
    /// Identity lookup used by the auth extractor on every request.
    async fn get_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, email, name, password_hash, role FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// get_user_by_email
    ///
    /// Lookup for the registration duplicate check and the credentials flow.
    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, email, name, password_hash, role FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// create_user
    ///
    /// Inserts the registration record; a duplicate email surfaces as a
    /// conflict, not a storage failure.
    async fn create_user(&self, user: User) -> AppResult<User> {
        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, name, password_hash, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, name, password_hash, role
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(&user.role)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(user) => Ok(user),
            Err(e) if is_unique_violation(&e, "users_email_key") => {
                Err(AppError::Conflict("Email already registered".into()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
