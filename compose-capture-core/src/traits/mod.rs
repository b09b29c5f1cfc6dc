pub mod capture_source;
pub mod device_directory;
pub mod source_backend;
pub mod two_state_lock;
