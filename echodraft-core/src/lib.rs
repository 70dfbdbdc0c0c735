pub mod echo_guard;
pub mod error;
pub mod stage;
pub mod transcript;
pub mod types;

pub use echo_guard::*;
pub use error::*;
pub use stage::*;
pub use transcript::*;
pub use types::*;
