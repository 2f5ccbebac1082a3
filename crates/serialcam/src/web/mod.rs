//! HTTP surface for listing and serving stored images and driving the
//! serial connection.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;
