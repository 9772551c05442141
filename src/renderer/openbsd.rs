use log::debug;

use crate::error::Result;
use crate::renderer::{BsdRenderer, InterfaceConfig, RenderedConfig, Renderer};

pub fn available(sysname: &str) -> bool {
    sysname == "OpenBSD"
}

/// Writes one `/etc/hostname.<if>` file per interface and the default
/// gateway to `/etc/mygate`.
pub struct OpenBsdRenderer {
    base: BsdRenderer,
}

impl OpenBsdRenderer {
    pub fn new(base: BsdRenderer) -> Self {
        Self { base }
    }
}

impl Renderer for OpenBsdRenderer {
    fn name(&self) -> &'static str {
        "openbsd"
    }

    fn base(&self) -> &BsdRenderer {
        &self.base
    }

    fn write_config(&self, config: &RenderedConfig) -> Result<()> {
        for (name, iface) in &config.interfaces {
            let contents = match iface {
                InterfaceConfig::Dhcp => "dhcp\n".to_string(),
                InterfaceConfig::Static { address, netmask } => {
                    format!("inet {} {}\n", address, netmask)
                }
            };
            self.base
                .write_file(&format!("etc/hostname.{}", name), &contents)?;
        }
        Ok(())
    }

    fn set_route(&self, network: &str, _netmask: &str, gateway: &str) -> Result<()> {
        if network != "0.0.0.0" {
            debug!("Ignoring route to {} via {}", network, gateway);
            return Ok(());
        }
        self.base.write_file("etc/mygate", &format!("{}\n", gateway))
    }

    fn start_services(&self, _config: &RenderedConfig, run: bool) -> Result<()> {
        if !self.base.postcmds() || !run {
            debug!("openbsd network restart disabled");
            return Ok(());
        }
        self.base.run(&["sh", "/etc/netstart"], &[0])
    }
}
