pub mod asset_handlers;
pub mod auth_handlers;
pub mod health_handlers;
pub mod item_handlers;
