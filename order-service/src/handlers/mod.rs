mod app;
mod orders;

pub use app::{router, AppState};
pub use orders::{OrderLine, PlaceOrderRequest, UpdateOrderRequest};
