pub mod analyzer;
pub mod api;
pub mod carry;
pub mod config;
pub mod detector;
pub mod error;
pub mod forwarder;
pub mod metadata;
pub mod onnx;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod source;
pub mod state;
pub mod tracker;
pub mod tracking;
pub mod video;

pub use config::PeopleServiceConfig;
pub use error::ApiError;
pub use state::PeopleServiceState;
