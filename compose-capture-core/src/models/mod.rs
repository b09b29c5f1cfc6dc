pub mod audio_format;
pub mod audio_options;
pub mod config;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod source;
pub mod state;
