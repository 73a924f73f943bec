#![forbid(unsafe_code)]

pub mod error;
pub mod extract;
pub mod handlers;
pub mod router;

use services::AppServices;

pub use error::ApiError;
pub use extract::{Caller, USER_HEADER};
pub use router::router;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub services: AppServices,
}

impl AppState {
    #[must_use]
    pub fn new(services: AppServices) -> Self {
        Self { services }
    }
}
