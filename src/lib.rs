mod class_info;
mod ort_service;
mod results;
mod routes;
mod server;
mod telemetry;
mod upload;

pub mod app;
pub mod config;
pub mod model_service;

pub use app::start_app;
pub use class_info::{ClassCatalog, NO_INFO_AVAILABLE};
pub use results::{ClassResult, ProcessResponse};
