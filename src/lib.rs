pub mod aws;
pub mod backoff;
pub mod config;
pub mod constants;
pub mod error;
pub mod fs;
pub mod hotplug;
pub mod logger;
pub mod netstate;
pub mod renderer;
pub mod reporting;
pub mod source;
pub mod sysfs;
pub mod uevent;
