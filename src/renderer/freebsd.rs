use log::debug;

use crate::error::Result;
use crate::renderer::{BsdRenderer, InterfaceConfig, RenderedConfig, Renderer};

pub fn available(sysname: &str) -> bool {
    sysname == "FreeBSD"
}

pub struct FreeBsdRenderer {
    base: BsdRenderer,
}

impl FreeBsdRenderer {
    pub fn new(base: BsdRenderer) -> Self {
        Self { base }
    }
}

impl Renderer for FreeBsdRenderer {
    fn name(&self) -> &'static str {
        "freebsd"
    }

    fn base(&self) -> &BsdRenderer {
        &self.base
    }

    fn write_config(&self, config: &RenderedConfig) -> Result<()> {
        let values: Vec<(String, String)> = config
            .interfaces
            .iter()
            .map(|(name, iface)| {
                let value = match iface {
                    InterfaceConfig::Dhcp => "DHCP".to_string(),
                    InterfaceConfig::Static { address, netmask } => {
                        format!("{} netmask {}", address, netmask)
                    }
                };
                (format!("ifconfig_{}", name), value)
            })
            .collect();
        self.base.set_rc_config_values(&values)
    }

    fn set_route(&self, network: &str, _netmask: &str, gateway: &str) -> Result<()> {
        if network != "0.0.0.0" {
            debug!("Ignoring route to {} via {}", network, gateway);
            return Ok(());
        }
        self.base
            .set_rc_config_values(&[("defaultrouter".to_string(), gateway.to_string())])
    }

    // dhclient and routing exit 1 when there is nothing to restart.
    fn start_services(&self, config: &RenderedConfig, run: bool) -> Result<()> {
        if !self.base.postcmds() || !run {
            debug!("freebsd network restart disabled");
            return Ok(());
        }
        for name in config.dhcp_interfaces() {
            self.base
                .run(&["service", "dhclient", "restart", name], &[0, 1])?;
        }
        self.base.run(&["service", "netif", "restart"], &[0])?;
        self.base.run(&["service", "routing", "restart"], &[0, 1])
    }
}
