pub mod app;
pub mod batch;
pub mod carve;
pub mod config;
pub mod display;
pub mod error;
pub mod events;
pub mod export;
pub mod gpu;
pub mod loader;
