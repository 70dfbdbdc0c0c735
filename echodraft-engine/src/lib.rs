pub mod delivery;
pub mod history;
pub mod pipeline;
pub mod progress;
pub mod recording;
pub mod router;
pub mod session;
pub mod settings;
pub mod tracker;
pub mod traits;
