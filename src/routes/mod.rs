/// Router Module Index
///
/// Organizes the application's routing into security-segregated modules so
/// access control is applied explicitly at the module level (via Axum
/// layers) instead of per-handler convention.

/// Routes accessible to all clients: read-only category/resource access,
/// registration, and the health probe.
pub mod public;

/// The mutating routes (category/resource writes, upload). The whole
/// module is wrapped in an authentication layer, and every handler
/// additionally requires the ADMIN role.
pub mod admin;
