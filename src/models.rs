use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{AppError, AppResult, FieldError};

// --- Role & Vocabulary Constants ---

/// The default role granted at registration.
pub const ROLE_USER: &str = "USER";
/// The elevated role required for every mutating operation.
pub const ROLE_ADMIN: &str = "ADMIN";

/// Accepted resource type discriminants, in wire spelling.
pub const RESOURCE_TYPES: [&str; 5] = ["pdf", "video", "image", "link", "redirect"];
/// Accepted storefront association tags.
pub const STORE_ASSOCIATIONS: [&str; 3] = ["printings", "numlit", "global"];

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// Canonical identity record from the `users` table. The password hash is
/// carried for authentication only and never serialized into responses.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    #[serde(skip)]
    #[ts(skip)]
    pub password_hash: Option<String>,
    // The RBAC field: 'USER' or 'ADMIN'.
    pub role: String,
}

/// Category
///
/// A node of the category hierarchy, including the dependent counts every
/// listing carries (`resource_count` drives the delete guard and the admin
/// tree UI badges).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// URL-safe unique identifier derived from the name.
    pub slug: String,
    /// Self-reference into `categories`. None for top-level categories.
    pub parent_id: Option<i64>,
    /// Number of resources linked to this category.
    pub resource_count: i64,
    /// Number of direct subcategories.
    pub children_count: i64,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// CategorySummary
///
/// The reduced category projection embedded in resource responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CategorySummary {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// Resource
///
/// An educational material from the `resources` table, enriched with its
/// category associations (loaded separately, not part of the row itself).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Resource {
    pub id: Uuid,
    /// Display title, mirrored from the Romanian title at write time.
    pub title: String,
    /// Display description, mirrored from the Romanian description.
    pub description: Option<String>,
    pub title_ro: String,
    pub title_en: Option<String>,
    pub description_ro: Option<String>,
    pub description_en: Option<String>,

    /// Maps the SQL column "type" to `resource_type`: `type` is a reserved
    /// keyword in Rust, but the wire format keeps the original key.
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub resource_type: String,

    // Source fields: which one is set depends on resource_type.
    pub file_url: Option<String>,
    pub external_link: Option<String>,
    pub thumbnail_url: Option<String>,

    /// Storefront tag: 'printings', 'numlit', or 'global'.
    pub store_association: Option<String>,

    /// Linked categories. Populated by the repository after the row fetch.
    #[sqlx(skip)]
    pub categories: Vec<CategorySummary>,

    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

// --- Request Payloads (Input Schemas) ---

/// ResourceSource
///
/// Tagged union over the resource type. Each variant carries exactly the
/// source field its type requires, so a pdf without a file or a link
/// without a URL cannot be expressed at all; the discriminant arrives on
/// the wire as the `type` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
#[ts(export)]
pub enum ResourceSource {
    Pdf {
        #[serde(rename = "fileUrl")]
        file_url: String,
    },
    Video {
        #[serde(rename = "fileUrl")]
        file_url: String,
    },
    Image {
        #[serde(rename = "fileUrl")]
        file_url: String,
    },
    Link {
        #[serde(rename = "externalLink")]
        external_link: String,
    },
    Redirect {
        #[serde(rename = "externalLink")]
        external_link: String,
    },
}

impl ResourceSource {
    /// The wire discriminant, matching the `type` column.
    pub fn type_str(&self) -> &'static str {
        match self {
            Self::Pdf { .. } => "pdf",
            Self::Video { .. } => "video",
            Self::Image { .. } => "image",
            Self::Link { .. } => "link",
            Self::Redirect { .. } => "redirect",
        }
    }

    pub fn file_url(&self) -> Option<&str> {
        match self {
            Self::Pdf { file_url } | Self::Video { file_url } | Self::Image { file_url } => {
                Some(file_url)
            }
            _ => None,
        }
    }

    pub fn external_link(&self) -> Option<&str> {
        match self {
            Self::Link { external_link } | Self::Redirect { external_link } => Some(external_link),
            _ => None,
        }
    }
}

/// CreateCategoryRequest
///
/// Input payload for POST /categories. The slug is derived server-side.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
}

impl CreateCategoryRequest {
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::invalid_fields(
                "Invalid data",
                vec![FieldError::new("name", "Name is required")],
            ));
        }
        Ok(())
    }
}

/// UpdateCategoryRequest
///
/// Partial update payload for PATCH /categories/{id}. `description` and
/// `parentId` distinguish "absent" (leave unchanged) from "null" (clear):
/// the outer Option is presence, the inner Option is the new value.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateCategoryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_some"
    )]
    pub description: Option<Option<String>>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_some"
    )]
    pub parent_id: Option<Option<i64>>,
}

impl UpdateCategoryRequest {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(AppError::invalid_fields(
                    "Invalid data",
                    vec![FieldError::new("name", "Name is required")],
                ));
            }
        }
        Ok(())
    }
}

/// Distinguishes an explicit `null` from an absent field: combined with
/// `#[serde(default)]`, a present field always deserializes to `Some(..)`.
fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// CreateResourceRequest
///
/// Input payload for POST /resources and PATCH /resources/{id} (updates
/// are validated against the full create shape, as in the admin UI). The
/// `type` discriminant and its source field arrive through the flattened
/// [`ResourceSource`] union.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateResourceRequest {
    pub title_ro: String,
    pub title_en: Option<String>,
    pub description_ro: Option<String>,
    pub description_en: Option<String>,

    #[serde(flatten)]
    pub source: ResourceSource,

    pub thumbnail_url: Option<String>,
    pub store_association: Option<String>,

    /// Ids of the categories this resource belongs to. Must be non-empty.
    pub category_ids: Vec<i64>,
}

impl CreateResourceRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut details = Vec::new();

        if self.title_ro.trim().is_empty() {
            details.push(FieldError::new("titleRo", "Romanian title is required"));
        }

        if self.category_ids.is_empty() {
            details.push(FieldError::new(
                "categoryIds",
                "Select at least one category",
            ));
        }

        if let Some(file_url) = self.source.file_url() {
            if file_url.trim().is_empty() {
                details.push(FieldError::new(
                    "fileUrl",
                    "A file is required for this resource type",
                ));
            }
        }

        if let Some(link) = self.source.external_link() {
            if !(link.starts_with("http://") || link.starts_with("https://")) {
                details.push(FieldError::new("externalLink", "Invalid external link"));
            }
        }

        if let Some(store) = &self.store_association {
            if !STORE_ASSOCIATIONS.contains(&store.as_str()) {
                details.push(FieldError::new(
                    "storeAssociation",
                    "Invalid store association",
                ));
            }
        }

        if details.is_empty() {
            Ok(())
        } else {
            Err(AppError::invalid_fields("Invalid data", details))
        }
    }
}

/// RegisterRequest
///
/// Input payload for POST /auth/register. The password is hashed before it
/// ever reaches the store; the role is derived from the admin allow-list.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

impl RegisterRequest {
    pub fn validate(&self) -> AppResult<()> {
        let mut details = Vec::new();

        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            details.push(FieldError::new("email", "Invalid email address"));
        }

        if self.password.len() < 8 {
            details.push(FieldError::new(
                "password",
                "Password must be at least 8 characters",
            ));
        }

        if details.is_empty() {
            Ok(())
        } else {
            Err(AppError::invalid_fields("Invalid data", details))
        }
    }
}

// --- Query Parameters ---

/// ResourceFilter
///
/// Accepted query parameters for GET /resources. Unknown `type` and
/// `storeAssociation` values are ignored rather than rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    /// Restrict to resources linked to this category.
    pub category_id: Option<i64>,
    /// Restrict to a single resource type.
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
    /// Case-insensitive search over titles and descriptions.
    pub search: Option<String>,
    /// Restrict to a storefront association.
    pub store_association: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ResourceFilter {
    /// The effective 1-based page, defaulting to 1.
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    /// The effective page size, defaulting to 20.
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(20).max(1)
    }
}

// --- Response Envelopes ---

/// ApiResponse
///
/// The uniform success envelope: `{success: true, data, message?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: Some(message.into()),
        }
    }
}

/// Pagination
///
/// Paging metadata attached to list responses.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            page,
            limit,
            total,
            // Ceiling division; zero rows means zero pages.
            total_pages: (total + limit - 1) / limit.max(1),
        }
    }
}

/// PaginatedResponse
///
/// The list envelope: `{success, data, pagination}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, pagination: Pagination) -> Self {
        Self {
            success: true,
            data,
            pagination,
        }
    }
}

/// MessageResponse
///
/// Envelope for operations that return no data (deletes).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// UploadResponse
///
/// Result of a successful file upload: the public-relative URL plus the
/// original name and size echoed back for the client form.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UploadResponse {
    pub success: bool,
    pub file_url: String,
    pub file_name: String,
    pub file_size: u64,
}
