mod app;
mod internal;
mod users;

pub use app::{router, AppState};
pub use users::{CreateUserRequest, UpdateUserRequest};
