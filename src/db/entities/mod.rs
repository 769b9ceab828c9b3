//! SeaORM entities mapping to the bookmark manager's tables.

pub mod bookmark;
pub mod category;
pub mod setting;

// Prelude module for easy importing of all entities and their related types
pub mod prelude {
    pub use super::bookmark::Entity as Bookmark;
    pub use super::bookmark::Model as BookmarkModel;
    pub use super::bookmark::ActiveModel as BookmarkActiveModel;
    pub use super::bookmark::Column as BookmarkColumn;

    pub use super::category::Entity as Category;
    pub use super::category::Model as CategoryModel;
    pub use super::category::ActiveModel as CategoryActiveModel;
    pub use super::category::Column as CategoryColumn;

    pub use super::setting::Entity as Setting;
    pub use super::setting::Model as SettingModel;
    pub use super::setting::ActiveModel as SettingActiveModel;
    pub use super::setting::Column as SettingColumn;
}
