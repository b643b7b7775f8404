pub mod calls;
pub mod chats;
pub mod error;
pub mod keys;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod receipts;
pub mod router;
pub mod scheduled;
pub mod scheduler;
pub mod state;
pub mod sync;

pub use error::ApiError;
pub use router::router;
pub use state::{AppState, AppStateInner};
