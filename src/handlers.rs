mod log;

pub use log::LogHandler;
