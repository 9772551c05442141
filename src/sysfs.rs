use std::collections::HashMap;
use std::fs::{self, read_dir};
use std::path::{Path, PathBuf};

use log::debug;

use crate::constants;

const CLASS_NET: &str = "class/net";
const ATTR_ADDRESS: &str = "address";

/// Reads network device attributes from `<sys-root>/class/net`.
#[derive(Clone, Debug)]
pub struct SysfsNet {
    class_net: PathBuf,
}

impl Default for SysfsNet {
    fn default() -> Self {
        Self::new(constants::DIR_SYS)
    }
}

impl SysfsNet {
    pub fn new<P: AsRef<Path>>(sys_root: P) -> Self {
        Self {
            class_net: sys_root.as_ref().join(CLASS_NET),
        }
    }

    // Missing, unreadable, and empty attributes are all treated as absent.
    fn read_attr(&self, ifname: &str, attr: &str) -> Option<String> {
        let path = self.class_net.join(ifname).join(attr);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let value = contents.trim_end();
                if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            Err(e) => {
                debug!("unable to read {:?}: {}", path, e);
                None
            }
        }
    }

    /// Resolve the hardware address of the device at `device_path`. Only the
    /// basename of the path is used, so both `/sys/...` and udev `DEVPATH`
    /// forms work.
    pub fn resolve(&self, device_path: &str) -> Option<String> {
        let ifname = Path::new(device_path).file_name()?.to_str()?;
        let mac = self.read_attr(ifname, ATTR_ADDRESS);
        debug!("Resolved {} to hardware address {:?}", ifname, mac);
        mac
    }

    /// Map each local hardware address to its interface name.
    pub fn interfaces_by_mac(&self) -> HashMap<String, String> {
        let mut by_mac = HashMap::new();
        let Ok(entries) = read_dir(&self.class_net) else {
            return by_mac;
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        for name in names {
            if let Some(mac) = self.read_attr(&name, ATTR_ADDRESS) {
                by_mac.entry(mac).or_insert(name);
            }
        }
        by_mac
    }
}

#[cfg(test)]
pub(crate) fn fake_sysfs(devices: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, address) in devices {
        let device_dir = dir.path().join(CLASS_NET).join(name);
        fs::create_dir_all(&device_dir).unwrap();
        fs::write(device_dir.join(ATTR_ADDRESS), address).unwrap();
    }
    dir
}
