pub mod engine;
pub mod state;

pub use engine::{MonitorConfig, MonitorError, MonitorLoop, MonitorStats};
pub use state::{LoopState, MonitorHandle};
