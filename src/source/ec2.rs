//! Network configuration derived from the EC2 instance metadata service.

use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use serde_json::{Value, json};

use crate::aws::context::AwsCtx;
use crate::error::{Error, Result};
use crate::netstate::Document;
use crate::sysfs::SysfsNet;

const PATH_MACS: &str = "network/interfaces/macs";

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Ec2Nic {
    pub(crate) mac: String,
    pub(crate) device_number: u32,
    pub(crate) has_ipv6: bool,
}

pub trait MetadataService {
    fn network_config(&self) -> Result<Document>;
}

pub struct Ec2Metadata {
    aws: AwsCtx,
    sysfs: SysfsNet,
    timeout: Duration,
}

impl Ec2Metadata {
    pub fn new(sysfs: SysfsNet, timeout: Duration) -> Self {
        Self {
            aws: AwsCtx::new(),
            sysfs,
            timeout,
        }
    }

    fn nics(&self) -> anyhow::Result<Vec<Ec2Nic>> {
        let imds = self.aws.imds()?;
        imds.wait_for(self.timeout)?;
        let mut nics = Vec::new();
        for mac in imds.list_metadata(PATH_MACS)? {
            let device_number = imds
                .get_metadata(&format!("{}/{}/device-number", PATH_MACS, mac))?;
            let device_number = device_number.trim().parse().map_err(|e| {
                anyhow::anyhow!("invalid device number {:?} for {}: {}", device_number, mac, e)
            })?;
            let ipv6s = imds.get_optional_metadata(&format!("{}/{}/ipv6s", PATH_MACS, mac))?;
            nics.push(Ec2Nic {
                mac,
                device_number,
                has_ipv6: ipv6s.is_some_and(|s| !s.trim().is_empty()),
            });
        }
        debug!("Instance network interfaces: {:?}", nics);
        Ok(nics)
    }
}

impl MetadataService for Ec2Metadata {
    fn network_config(&self) -> Result<Document> {
        let nics = self
            .nics()
            .map_err(|e| Error::Metadata(format!("{:#}", e)))?;
        Ok(build_network_config(nics, &self.sysfs.interfaces_by_mac()))
    }
}

/// A version 1 document with one DHCP interface per attached NIC, in device
/// order. NICs are named after the local interface with the same address,
/// falling back to `eth<device-number>`.
pub(crate) fn build_network_config(
    mut nics: Vec<Ec2Nic>,
    local_names: &HashMap<String, String>,
) -> Document {
    nics.sort_by_key(|nic| nic.device_number);
    let config: Vec<Value> = nics
        .into_iter()
        .map(|nic| {
            let name = local_names
                .get(&nic.mac)
                .cloned()
                .unwrap_or_else(|| format!("eth{}", nic.device_number));
            let mut subnets = vec![json!({"type": "dhcp4"})];
            if nic.has_ipv6 {
                subnets.push(json!({"type": "dhcp6"}));
            }
            json!({
                "type": "physical",
                "name": name,
                "mac_address": nic.mac,
                "subnets": subnets,
            })
        })
        .collect();
    json!({"version": 1, "config": config})
}
