pub mod detections;
pub mod report;
pub mod validation;
pub mod zones;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
