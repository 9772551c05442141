pub const DIR_ROOT: &str = "/";
pub const DIR_SYS: &str = "/sys";

pub const FILE_CONFIG: &str = "/etc/easyto/hotplug.yaml";
pub const FILE_INSTANCE_CACHE: &str = "/var/lib/easyto/instance/cache.json";

pub const ENV_TZ: &str = "TZ";
pub const ENV_TZ_DEFAULT: &str = ":/etc/localtime";

pub const HOTPLUG_NAME: &str = "hotplug-hook";
pub const HOTPLUG_DESCRIPTION: &str = "Handle reconfiguration on hotplug events";

// Seconds to wait after each failed attempt.
pub const RETRY_SCHEDULE: [u64; 5] = [1, 1, 1, 3, 5];

pub const IMDS_TIMEOUT_SECS: u64 = 10;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_UNHANDLED: u8 = 1;
pub const EXIT_FAILURE: u8 = 2;
