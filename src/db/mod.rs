pub mod category_tree;
pub mod entities;
pub mod schema;
pub mod services;
