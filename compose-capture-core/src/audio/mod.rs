pub mod device_capture;
pub mod manager;
pub mod reconnect;
