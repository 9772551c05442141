//! Turns a parsed network configuration into OS-native configuration.
//!
//! Every renderer shares [`BsdRenderer`] for target-rooted atomic writes,
//! `rc.conf` edits, `resolv.conf`, and command execution, and overrides only
//! the three OS-specific steps: interface files, the default route, and the
//! network restart.

pub mod bsd;
pub mod freebsd;
pub mod netbsd;
pub mod openbsd;

use std::process::Command;
use std::str::FromStr;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::netstate::{Document, NetworkState};

pub use bsd::{BsdRenderer, InterfaceConfig, RenderedConfig};

pub trait Renderer {
    fn name(&self) -> &'static str;

    fn base(&self) -> &BsdRenderer;

    /// Write one configuration artifact per interface, replacing any
    /// previous contents.
    fn write_config(&self, config: &RenderedConfig) -> Result<()>;

    /// Record the default gateway. Routes to any network other than
    /// `0.0.0.0` are ignored.
    fn set_route(&self, network: &str, netmask: &str, gateway: &str) -> Result<()>;

    /// Restart networking if post-commands are enabled and `run` is set.
    fn start_services(&self, config: &RenderedConfig, run: bool) -> Result<()>;

    fn render_network_state(&self, state: &NetworkState, bring_up: bool) -> Result<()> {
        let config = RenderedConfig::from_network_state(state);
        debug!("Rendered configuration: {:?}", config);
        self.base().write_resolv_conf(&config.dns)?;
        self.write_config(&config)?;
        for route in &config.routes {
            self.set_route(&route.network, &route.netmask, &route.gateway)?;
        }
        self.start_services(&config, bring_up)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RendererKind {
    OpenBsd,
    NetBsd,
    FreeBsd,
}

impl FromStr for RendererKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openbsd" => Ok(RendererKind::OpenBsd),
            "netbsd" => Ok(RendererKind::NetBsd),
            "freebsd" => Ok(RendererKind::FreeBsd),
            other => Err(Error::Config(format!("unknown renderer {}", other))),
        }
    }
}

impl RendererKind {
    const ALL: [RendererKind; 3] = [
        RendererKind::OpenBsd,
        RendererKind::NetBsd,
        RendererKind::FreeBsd,
    ];

    pub fn available(self, sysname: &str) -> bool {
        match self {
            RendererKind::OpenBsd => openbsd::available(sysname),
            RendererKind::NetBsd => netbsd::available(sysname),
            RendererKind::FreeBsd => freebsd::available(sysname),
        }
    }

    pub fn probe(sysname: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.available(sysname))
    }

    pub fn build(self, base: BsdRenderer) -> Box<dyn Renderer> {
        match self {
            RendererKind::OpenBsd => Box::new(openbsd::OpenBsdRenderer::new(base)),
            RendererKind::NetBsd => Box::new(netbsd::NetBsdRenderer::new(base)),
            RendererKind::FreeBsd => Box::new(freebsd::FreeBsdRenderer::new(base)),
        }
    }
}

/// The kernel name as reported by uname(2), e.g. "OpenBSD" or "Linux".
pub fn current_sysname() -> String {
    rustix::system::uname()
        .sysname()
        .to_string_lossy()
        .into_owned()
}

pub trait CommandRunner {
    /// Run `args`, treating any exit code in `ok_codes` as success.
    fn run(&self, args: &[&str], ok_codes: &[i32]) -> Result<()>;
}

pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, args: &[&str], ok_codes: &[i32]) -> Result<()> {
        let command = args.join(" ");
        let (program, rest) = args.split_first().ok_or_else(|| Error::OsCommand {
            command: command.clone(),
            detail: "empty command".into(),
        })?;
        debug!("Running {}", command);
        let output = Command::new(program)
            .args(rest)
            .output()
            .map_err(|e| Error::OsCommand {
                command: command.clone(),
                detail: e.to_string(),
            })?;
        match output.status.code() {
            Some(code) if ok_codes.contains(&code) => Ok(()),
            Some(code) => Err(Error::OsCommand {
                command,
                detail: format!(
                    "exit code {}: {}",
                    code,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }),
            None => Err(Error::OsCommand {
                command,
                detail: "terminated by signal".into(),
            }),
        }
    }
}

/// Applies network configuration documents with the renderer selected for
/// this system.
pub struct Distro {
    sysname: String,
    renderer: Option<Box<dyn Renderer>>,
}

impl Distro {
    pub fn new(kind: Option<RendererKind>, sysname: String, base: BsdRenderer) -> Self {
        let renderer = kind
            .or_else(|| RendererKind::probe(&sysname))
            .map(|kind| kind.build(base));
        Self { sysname, renderer }
    }

    pub fn renderer_name(&self) -> Option<&'static str> {
        self.renderer.as_ref().map(|r| r.name())
    }

    pub fn apply_network_config(&self, config: &Document, bring_up: bool) -> Result<()> {
        let renderer = self
            .renderer
            .as_deref()
            .ok_or_else(|| Error::NoRenderer(self.sysname.clone()))?;
        let state = NetworkState::parse(config)?;
        info!(
            "Applying network configuration with {} renderer",
            renderer.name()
        );
        renderer.render_network_state(&state, bring_up)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[derive(Clone, Default)]
    pub(crate) struct RecordingRunner {
        pub(crate) commands: Rc<RefCell<Vec<String>>>,
        pub(crate) fail: bool,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, args: &[&str], _ok_codes: &[i32]) -> Result<()> {
            let command = args.join(" ");
            self.commands.borrow_mut().push(command.clone());
            if self.fail {
                return Err(Error::OsCommand {
                    command,
                    detail: "exit code 1: failed".into(),
                });
            }
            Ok(())
        }
    }

    pub(crate) fn base_in(
        target: &std::path::Path,
        postcmds: bool,
    ) -> (BsdRenderer, Rc<RefCell<Vec<String>>>) {
        let runner = RecordingRunner::default();
        let commands = runner.commands.clone();
        (
            BsdRenderer::new(target, postcmds, Box::new(runner)),
            commands,
        )
    }

    #[test]
    fn test_probe() {
        struct Case<'a> {
            sysname: &'a str,
            expected: Option<RendererKind>,
        }
        let cases = [
            Case {
                sysname: "OpenBSD",
                expected: Some(RendererKind::OpenBsd),
            },
            Case {
                sysname: "NetBSD",
                expected: Some(RendererKind::NetBsd),
            },
            Case {
                sysname: "FreeBSD",
                expected: Some(RendererKind::FreeBsd),
            },
            Case {
                sysname: "Linux",
                expected: None,
            },
        ];
        for case in cases {
            assert_eq!(case.expected, RendererKind::probe(case.sysname));
        }
    }

    #[test]
    fn test_renderer_kind_from_str() {
        assert_eq!(RendererKind::OpenBsd, "openbsd".parse::<RendererKind>().unwrap());
        assert_eq!(RendererKind::NetBsd, "netbsd".parse::<RendererKind>().unwrap());
        assert_eq!(RendererKind::FreeBsd, "freebsd".parse::<RendererKind>().unwrap());
        assert!(matches!(
            "FreeBSD".parse::<RendererKind>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_system_runner() {
        assert!(SystemRunner.run(&["true"], &[0]).is_ok());
        assert!(matches!(
            SystemRunner.run(&["false"], &[0]),
            Err(Error::OsCommand { .. })
        ));
        assert!(SystemRunner.run(&["false"], &[0, 1]).is_ok());
        assert!(matches!(
            SystemRunner.run(&["/nonexistent/netstart"], &[0]),
            Err(Error::OsCommand { .. })
        ));
        assert!(matches!(
            SystemRunner.run(&[], &[0]),
            Err(Error::OsCommand { .. })
        ));
    }

    #[test]
    fn test_distro_without_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let (base, _) = base_in(dir.path(), true);
        let distro = Distro::new(None, "Linux".into(), base);
        assert_eq!(distro.renderer_name(), None);
        let result = distro.apply_network_config(&json!({"version": 1, "config": []}), true);
        assert!(matches!(result, Err(Error::NoRenderer(s)) if s == "Linux"));
    }

    #[test]
    fn test_distro_forced_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let (base, commands) = base_in(dir.path(), true);
        let distro = Distro::new(Some(RendererKind::OpenBsd), "Linux".into(), base);
        assert_eq!(distro.renderer_name(), Some("openbsd"));
        distro
            .apply_network_config(
                &json!({
                    "version": 1,
                    "config": [{
                        "type": "physical",
                        "name": "vio0",
                        "mac_address": "aa:bb:cc:dd:ee:ff",
                        "subnets": [{"type": "dhcp"}]
                    }]
                }),
                true,
            )
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("etc/hostname.vio0")).unwrap(),
            "dhcp\n"
        );
        assert_eq!(*commands.borrow(), vec!["sh /etc/netstart".to_string()]);
    }

    #[test]
    fn test_distro_rejects_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        let (base, commands) = base_in(dir.path(), true);
        let distro = Distro::new(Some(RendererKind::FreeBsd), "FreeBSD".into(), base);
        let result = distro.apply_network_config(&json!({"version": 7}), true);
        assert!(matches!(result, Err(Error::ConfigParse(_))));
        assert!(commands.borrow().is_empty());
    }
}
