mod logging;

pub use logging::{init, LogConfig, LogFormat, LogOutput};
