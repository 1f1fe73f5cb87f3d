pub mod config;
pub mod handlers;
pub mod propagation;
pub mod repository;
