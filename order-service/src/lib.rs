pub mod config;
pub mod handlers;
pub mod model;
pub mod propagation;
pub mod repository;
