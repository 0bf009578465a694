pub mod session;

pub use session::{CreateRequest, CreateResponse, Session};
