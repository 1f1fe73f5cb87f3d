mod app;
mod internal;
mod products;

pub use app::{router, AppState};
pub use products::{CreateProductRequest, UpdateProductRequest};
