pub mod auth_service;
pub mod backend_client;
pub mod image_pipeline;
pub mod item_store;
pub mod kv_store;
pub mod sync_service;
pub mod view_state;
