use log::debug;

use crate::error::Result;
use crate::renderer::{BsdRenderer, InterfaceConfig, RenderedConfig, Renderer};

pub fn available(sysname: &str) -> bool {
    sysname == "NetBSD"
}

/// Configures interfaces through `rc.conf`, with dhcpcd handling every
/// DHCP interface.
pub struct NetBsdRenderer {
    base: BsdRenderer,
}

impl NetBsdRenderer {
    pub fn new(base: BsdRenderer) -> Self {
        Self { base }
    }
}

impl Renderer for NetBsdRenderer {
    fn name(&self) -> &'static str {
        "netbsd"
    }

    fn base(&self) -> &BsdRenderer {
        &self.base
    }

    fn write_config(&self, config: &RenderedConfig) -> Result<()> {
        let mut values = Vec::new();
        let dhcp = config.dhcp_interfaces();
        if !dhcp.is_empty() {
            values.push(("dhcpcd".to_string(), "YES".to_string()));
            values.push(("dhcpcd_flags".to_string(), dhcp.join(" ")));
        }
        for (name, iface) in &config.interfaces {
            if let InterfaceConfig::Static { address, netmask } = iface {
                values.push((
                    format!("ifconfig_{}", name),
                    format!("{} netmask {}", address, netmask),
                ));
            }
        }
        self.base.set_rc_config_values(&values)
    }

    fn set_route(&self, network: &str, _netmask: &str, gateway: &str) -> Result<()> {
        if network != "0.0.0.0" {
            debug!("Ignoring route to {} via {}", network, gateway);
            return Ok(());
        }
        self.base
            .set_rc_config_values(&[("defaultroute".to_string(), gateway.to_string())])
    }

    fn start_services(&self, config: &RenderedConfig, run: bool) -> Result<()> {
        if !self.base.postcmds() || !run {
            debug!("netbsd network restart disabled");
            return Ok(());
        }
        self.base.run(&["service", "network", "restart"], &[0])?;
        if !config.dhcp_interfaces().is_empty() {
            self.base.run(&["service", "dhcpcd", "restart"], &[0])?;
        }
        Ok(())
    }
}
