pub mod activity;
pub mod auth;
pub mod directories;
pub mod logging;
pub mod settings_store;
pub mod shutdown;
