mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use error::attendance_err;
pub use router::handle_request;
pub use types::{AppState, Request};
