pub mod error_signal;
pub mod keyed_mutex;
pub mod orchestrator;
pub mod surface;
pub(crate) mod worker;
