pub mod backends;
pub mod cleanup;
pub mod dictionary;
pub mod endpoints;
pub mod secrets;
pub mod settings_store;
pub mod store;
pub mod streaming;
pub mod wav;
