/// HTTP JSON API surface: thin actix-web handlers over the
/// Store/Worker/Scheduler, with DTOs and error mapping kept in their own
/// modules so the route table stays readable.
pub mod dto;
pub mod error;
pub mod routes;

pub use error::ApiError;
pub use routes::{AppState, configure};
