pub mod config;
pub mod frame_logger;
pub mod frame_source;
pub mod log_index;
pub mod log_writer;
pub mod pipeline;
pub mod rotation;
