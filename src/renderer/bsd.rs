use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use rustix::fs::Mode;

use crate::error::{Error, Result};
use crate::fs::{JoinRelative, LockFile, atomic_write, mkdir_p};
use crate::netstate::{Dns, NetworkState, Route, SubnetKind};
use crate::renderer::CommandRunner;

pub const FILE_RC_CONF: &str = "etc/rc.conf";
pub const FILE_RESOLV_CONF: &str = "etc/resolv.conf";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InterfaceConfig {
    Dhcp,
    Static { address: String, netmask: String },
}

/// The subset of a network configuration that BSD systems can express.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedConfig {
    pub interfaces: BTreeMap<String, InterfaceConfig>,
    pub routes: Vec<Route>,
    pub dns: Dns,
}

// lo0, lo1, ...
fn is_loopback(name: &str) -> bool {
    name.strip_prefix("lo")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

impl RenderedConfig {
    pub fn from_network_state(state: &NetworkState) -> Self {
        let mut interfaces = BTreeMap::new();
        for record in state.iter_interfaces() {
            let Some(name) = record.name.as_deref() else {
                info!("Skipping interface without a name");
                continue;
            };
            if is_loopback(name) {
                continue;
            }
            // Only the first subnet of an interface is configured.
            let Some(subnet) = record.subnets.first() else {
                debug!("Interface {} has no subnets", name);
                continue;
            };
            let config = match (&subnet.kind, &subnet.address, &subnet.netmask) {
                (SubnetKind::Dhcp4, _, _) => InterfaceConfig::Dhcp,
                (SubnetKind::Static, Some(address), Some(netmask)) => InterfaceConfig::Static {
                    address: address.clone(),
                    netmask: netmask.clone(),
                },
                (SubnetKind::Static, _, _) => {
                    debug!("Skipping static subnet on {} without address and netmask", name);
                    continue;
                }
                (kind, _, _) => {
                    debug!("Skipping unsupported subnet type {:?} on {}", kind, name);
                    continue;
                }
            };
            interfaces.insert(name.to_string(), config);
        }
        Self {
            interfaces,
            routes: state.iter_routes().collect(),
            dns: state.dns().clone(),
        }
    }

    pub fn dhcp_interfaces(&self) -> Vec<&str> {
        self.interfaces
            .iter()
            .filter(|(_, config)| **config == InterfaceConfig::Dhcp)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Shared plumbing for the BSD renderers. All paths are resolved below
/// `target`.
pub struct BsdRenderer {
    target: PathBuf,
    postcmds: bool,
    runner: Box<dyn CommandRunner>,
}

impl BsdRenderer {
    pub fn new<P: AsRef<Path>>(target: P, postcmds: bool, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            target: target.as_ref().to_path_buf(),
            postcmds,
            runner,
        }
    }

    pub fn postcmds(&self) -> bool {
        self.postcmds
    }

    pub fn target_path<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.target.join_relative(path)
    }

    pub fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        let dest = self.target_path(path);
        if let Some(parent) = dest.parent() {
            mkdir_p(parent, Mode::from(0o755)).map_err(|e| Error::os_write(&dest, e))?;
        }
        atomic_write(&dest, |mut f| Ok(f.write_all(contents.as_bytes())?))
            .map_err(|e| Error::os_write(&dest, e))?;
        debug!("Wrote {}", dest.display());
        Ok(())
    }

    pub fn run(&self, args: &[&str], ok_codes: &[i32]) -> Result<()> {
        self.runner.run(args, ok_codes)
    }

    /// Set `key=value` pairs in `rc.conf`, keeping all other lines. The file
    /// is only rewritten when its contents change, and stays locked from the
    /// read through the write.
    pub fn set_rc_config_values(&self, values: &[(String, String)]) -> Result<()> {
        let dest = self.target_path(FILE_RC_CONF);
        if let Some(parent) = dest.parent() {
            mkdir_p(parent, Mode::from(0o755)).map_err(|e| Error::os_write(&dest, e))?;
        }
        let _lock = LockFile::acquire(&dest).map_err(|e| Error::os_write(&dest, e))?;
        let original = match fs::read_to_string(&dest) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(Error::OsConfigWrite {
                    path: dest,
                    detail: e.to_string(),
                });
            }
        };
        let updated = values
            .iter()
            .fold(original.clone(), |contents, (key, value)| {
                set_rc_value(&contents, key, value)
            });
        if updated == original {
            debug!("{} is unchanged", dest.display());
            return Ok(());
        }
        self.write_file(FILE_RC_CONF, &updated)
    }

    pub fn write_resolv_conf(&self, dns: &Dns) -> Result<()> {
        if dns.nameservers.is_empty() && dns.search.is_empty() {
            return Ok(());
        }
        self.write_file(FILE_RESOLV_CONF, &resolv_conf(dns))
    }
}

fn resolv_conf(dns: &Dns) -> String {
    let mut contents = String::new();
    if !dns.search.is_empty() {
        contents.push_str(&format!("search {}\n", dns.search.join(" ")));
    }
    for nameserver in &dns.nameservers {
        contents.push_str(&format!("nameserver {}\n", nameserver));
    }
    contents
}

// Quote a value for a shell-sourced file, leaving safe values bare.
fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r#"'"'"'"#))
    }
}

fn set_rc_value(contents: &str, key: &str, value: &str) -> String {
    let quoted = shell_quote(value);
    let mut found = false;
    let mut lines: Vec<String> = contents
        .lines()
        .map(|line| match line.split_once('=') {
            Some((k, _)) if k == key => {
                found = true;
                format!("{}={}", key, quoted)
            }
            _ => line.to_string(),
        })
        .collect();
    if !found {
        lines.push(format!("{}={}", key, quoted));
    }
    let mut updated = lines.join("\n");
    updated.push('\n');
    updated
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::renderer::SystemRunner;
    use crate::renderer::test::base_in;

    #[test]
    fn test_is_loopback() {
        for (name, expected) in [
            ("lo0", true),
            ("lo12", true),
            ("lo", false),
            ("lo0a", false),
            ("vio0", false),
            ("eth0", false),
        ] {
            assert_eq!(expected, is_loopback(name), "{}", name);
        }
    }

    #[test]
    fn test_shell_quote() {
        for (value, expected) in [
            ("YES", "YES"),
            ("10.0.0.1", "10.0.0.1"),
            ("DHCP", "DHCP"),
            ("10.0.0.5 netmask 255.255.255.0", "'10.0.0.5 netmask 255.255.255.0'"),
            ("", "''"),
            ("it's", r#"'it'"'"'s'"#),
        ] {
            assert_eq!(expected, shell_quote(value));
        }
    }

    #[test]
    fn test_set_rc_value() {
        struct Case<'a> {
            contents: &'a str,
            key: &'a str,
            value: &'a str,
            expected: &'a str,
        }
        let cases = [
            Case {
                contents: "",
                key: "defaultrouter",
                value: "10.0.0.1",
                expected: "defaultrouter=10.0.0.1\n",
            },
            Case {
                contents: "hostname=\"bsd\"\ndefaultrouter=10.0.0.9\n",
                key: "defaultrouter",
                value: "10.0.0.1",
                expected: "hostname=\"bsd\"\ndefaultrouter=10.0.0.1\n",
            },
            Case {
                contents: "# comment\nsshd_enable=YES",
                key: "ifconfig_vtnet0",
                value: "DHCP",
                expected: "# comment\nsshd_enable=YES\nifconfig_vtnet0=DHCP\n",
            },
            Case {
                contents: "ifconfig_vtnet0_alias0=x\n",
                key: "ifconfig_vtnet0",
                value: "DHCP",
                expected: "ifconfig_vtnet0_alias0=x\nifconfig_vtnet0=DHCP\n",
            },
        ];
        for case in cases {
            assert_eq!(case.expected, set_rc_value(case.contents, case.key, case.value));
        }
    }

    #[test]
    fn test_from_network_state() {
        let state = NetworkState::parse(&json!({
            "version": 1,
            "config": [
                {"type": "physical", "name": "lo0", "subnets": [{"type": "static", "address": "127.0.0.1/8"}]},
                {"type": "physical", "name": "vio0", "subnets": [{"type": "dhcp"}]},
                {"type": "physical", "name": "vio1", "subnets": [
                    {"type": "static", "address": "10.0.0.5/24", "gateway": "10.0.0.1"},
                    {"type": "dhcp"}
                ]},
                {"type": "physical", "name": "vio2", "subnets": [{"type": "static", "address": "2001:db8::5/64"}]},
                {"type": "physical", "name": "vio3", "subnets": [{"type": "dhcp6"}]},
                {"type": "physical", "name": "vio4"},
                {"type": "nameserver", "address": ["10.0.0.2"], "search": ["example.com"]}
            ]
        }))
        .unwrap();
        let config = RenderedConfig::from_network_state(&state);
        let expected: BTreeMap<String, InterfaceConfig> = [
            ("vio0".to_string(), InterfaceConfig::Dhcp),
            (
                "vio1".to_string(),
                InterfaceConfig::Static {
                    address: "10.0.0.5".into(),
                    netmask: "255.255.255.0".into(),
                },
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(expected, config.interfaces);
        assert_eq!(vec!["vio0"], config.dhcp_interfaces());
        assert_eq!(1, config.routes.len());
        assert!(config.routes[0].is_default());
        assert_eq!("10.0.0.1", config.routes[0].gateway);
        assert_eq!(vec!["10.0.0.2".to_string()], config.dns.nameservers);
    }

    #[test]
    fn test_write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = base_in(dir.path(), false);
        base.write_file("/etc/hostname.vio0", "dhcp\n").unwrap();
        assert_eq!(
            "dhcp\n",
            fs::read_to_string(dir.path().join("etc/hostname.vio0")).unwrap()
        );
    }

    #[test]
    fn test_set_rc_config_values_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = base_in(dir.path(), false);
        let values = vec![("dhcpcd".to_string(), "YES".to_string())];
        base.set_rc_config_values(&values).unwrap();
        let rc_conf = dir.path().join(FILE_RC_CONF);
        let modified = fs::metadata(&rc_conf).unwrap().modified().unwrap();
        base.set_rc_config_values(&values).unwrap();
        assert_eq!(modified, fs::metadata(&rc_conf).unwrap().modified().unwrap());
        assert_eq!("dhcpcd=YES\n", fs::read_to_string(&rc_conf).unwrap());
    }

    #[test]
    fn test_set_rc_config_values_concurrent() {
        let dir = tempfile::tempdir().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let target = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    let base = BsdRenderer::new(&target, false, Box::new(SystemRunner));
                    let values = vec![(format!("ifconfig_vio{}", i), "DHCP".to_string())];
                    base.set_rc_config_values(&values).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let rc_conf = fs::read_to_string(dir.path().join(FILE_RC_CONF)).unwrap();
        for i in 0..8 {
            assert!(rc_conf.contains(&format!("ifconfig_vio{}=DHCP\n", i)));
        }
        assert_eq!(8, rc_conf.lines().count());
        assert!(dir.path().join("etc/rc.conf.lock").exists());
    }

    #[test]
    fn test_write_resolv_conf() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = base_in(dir.path(), false);
        base.write_resolv_conf(&Dns::default()).unwrap();
        assert!(!dir.path().join(FILE_RESOLV_CONF).exists());

        let dns = Dns {
            nameservers: vec!["10.0.0.2".into(), "10.0.0.3".into()],
            search: vec!["example.com".into()],
        };
        base.write_resolv_conf(&dns).unwrap();
        assert_eq!(
            "search example.com\nnameserver 10.0.0.2\nnameserver 10.0.0.3\n",
            fs::read_to_string(dir.path().join(FILE_RESOLV_CONF)).unwrap()
        );
    }

    #[test]
    fn test_write_file_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("etc"), "not a directory").unwrap();
        let (base, _) = base_in(dir.path(), false);
        let result = base.write_file("etc/hostname.vio0", "dhcp\n");
        assert!(matches!(result, Err(Error::OsConfigWrite { .. })));
    }
}
