pub mod ai_routes;
pub mod auth_routes;
pub mod backup_routes;
pub mod bookmark_routes;
pub mod bulk_routes;
pub mod category_routes;
pub mod metadata_routes;
pub mod settings_routes;
