pub mod ai_service;
pub mod auth_service;
pub mod backup_service;
pub mod token;
