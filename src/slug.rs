use async_trait::async_trait;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::error::{AppError, AppResult};

/// Upper bound on uniqueness probes for a single slug resolution. Exceeding
/// it surfaces a storage error instead of looping against the store forever.
pub const MAX_SLUG_ATTEMPTS: u32 = 50;

/// slugify
///
/// Derives a URL-safe slug from a display name: decompose to NFD, drop the
/// combining marks (so "Matematică" becomes "matematica"), lowercase, then
/// collapse every run of non-alphanumeric characters into a single hyphen
/// with no leading or trailing hyphen. Pure and idempotent.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.nfd() {
        if is_combining_mark(c) {
            continue;
        }
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            // Any run of separators collapses into one hyphen, emitted lazily
            // so the result never starts or ends with one.
            pending_hyphen = true;
        }
    }

    slug
}

/// SlugIndex
///
/// The probe contract the uniqueness resolver runs against. Implemented by
/// the repository over the `categories.slug` column, and by in-memory
/// fixtures in tests.
#[async_trait]
pub trait SlugIndex: Send + Sync {
    /// Whether `slug` is already taken by a record other than `exclude_id`.
    async fn slug_in_use(&self, slug: &str, exclude_id: Option<i64>) -> AppResult<bool>;
}

/// resolve_unique
///
/// Resolves a free slug for `name`: probes the base slug first, then
/// `base-1`, `base-2`, ... in increasing order. `exclude_id` makes the
/// record being updated invisible to the probe, so renaming a category to
/// its own name keeps its slug.
///
/// The probe is an optimisation, not the authority: the store's unique
/// constraint still decides, and callers retry on an insert conflict.
pub async fn resolve_unique(
    index: &dyn SlugIndex,
    name: &str,
    exclude_id: Option<i64>,
) -> AppResult<String> {
    let base = slugify(name);
    if base.is_empty() {
        return Err(AppError::validation(
            "Name must contain at least one alphanumeric character",
        ));
    }

    if !index.slug_in_use(&base, exclude_id).await? {
        return Ok(base);
    }

    for counter in 1..=MAX_SLUG_ATTEMPTS {
        let candidate = format!("{base}-{counter}");
        if !index.slug_in_use(&candidate, exclude_id).await? {
            return Ok(candidate);
        }
    }

    Err(AppError::Storage(format!(
        "no free slug for '{base}' after {MAX_SLUG_ATTEMPTS} attempts"
    )))
}
