pub mod reaper;
pub mod session_store;

pub use reaper::SessionReaper;
pub use session_store::SessionStore;
