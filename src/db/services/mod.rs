//! High-level data access for the rest of the application. Handlers
//! never touch SQL or entity queries directly; they go through these
//! per-domain service modules.

pub mod bookmark_service;
pub mod bulk_service;
pub mod category_service;
pub mod import_service;
pub mod settings_service;
