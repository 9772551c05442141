use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::error::{Error, Result};
use crate::netstate::{Document, NetworkState};
use crate::source::Source;
use crate::sysfs::SysfsNet;

const SUBSYSTEM_NET: &str = "net";
const SUBSYSTEM_BLOCK: &str = "block";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subsystem {
    Net,
    Block,
}

impl FromStr for Subsystem {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            SUBSYSTEM_NET => Ok(Subsystem::Net),
            SUBSYSTEM_BLOCK => Ok(Subsystem::Block),
            other => Err(Error::Config(format!("unknown subsystem {}", other))),
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Subsystem::Net => SUBSYSTEM_NET,
            Subsystem::Block => SUBSYSTEM_BLOCK,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Add,
    Change,
    Remove,
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(Action::Add),
            "change" => Ok(Action::Change),
            "remove" => Ok(Action::Remove),
            other => Err(Error::InvalidAction(other.into())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Add => "add",
            Action::Change => "change",
            Action::Remove => "remove",
        })
    }
}

/// The triggering udev event.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceEvent {
    pub device_path: String,
    pub device_id: String,
    pub subsystem: Subsystem,
    pub action: Action,
}

/// How a `change` event is evaluated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChangePolicy {
    /// Refuse to evaluate, as for any unknown action.
    #[default]
    Reject,
    /// Evaluate like `add`: the device must be present in the config.
    Add,
    /// Succeed without refreshing metadata or applying anything.
    Ignore,
}

impl FromStr for ChangePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reject" => Ok(ChangePolicy::Reject),
            "add" => Ok(ChangePolicy::Add),
            "ignore" => Ok(ChangePolicy::Ignore),
            other => Err(Error::Config(format!("unknown change policy {}", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MatchOptions {
    pub change_policy: ChangePolicy,
    /// Compare hardware addresses case-insensitively with `-` treated as `:`.
    pub normalize_mac: bool,
}

fn normalize_mac(mac: &str) -> String {
    mac.trim().to_ascii_lowercase().replace('-', ":")
}

fn mac_eq(a: &str, b: &str, normalize: bool) -> bool {
    if normalize {
        normalize_mac(a) == normalize_mac(b)
    } else {
        a == b
    }
}

/// True if one or more interfaces in `state` carry `identifier` as their
/// hardware address.
pub fn is_present(identifier: &str, state: &NetworkState, normalize: bool) -> bool {
    let found: Vec<_> = state
        .iter_interfaces()
        .filter(|iface| {
            iface
                .mac_address
                .as_deref()
                .is_some_and(|mac| mac_eq(mac, identifier, normalize))
        })
        .collect();
    debug!("Ifaces with ID={}: {:?}", identifier, found);
    !found.is_empty()
}

/// Whether the configuration agrees with the event: an added device must be
/// present, a removed one absent.
pub fn detect(
    action: Action,
    identifier: &str,
    state: &NetworkState,
    options: &MatchOptions,
) -> Result<bool> {
    let present = is_present(identifier, state, options.normalize_mac);
    match (action, options.change_policy) {
        (Action::Add, _) | (Action::Change, ChangePolicy::Add) => Ok(present),
        (Action::Remove, _) => Ok(!present),
        (Action::Change, ChangePolicy::Ignore) => Ok(true),
        (Action::Change, ChangePolicy::Reject) => {
            Err(Error::InvalidAction(action.to_string()))
        }
    }
}

/// A per-subsystem strategy bound to a datasource and a device.
pub trait UeventHandler {
    fn config(&self) -> Result<Document>;

    fn detect(&self, action: Action) -> Result<bool>;

    fn apply(&self) -> Result<()>;

    fn source(&self) -> &dyn Source;

    fn source_mut(&mut self) -> &mut dyn Source;
}

pub struct NetHandler<'a> {
    source: &'a mut dyn Source,
    devpath: String,
    dev_id: String,
    identity: Option<String>,
    sysfs: SysfsNet,
    options: MatchOptions,
}

impl<'a> NetHandler<'a> {
    pub fn new(
        source: &'a mut dyn Source,
        event: &DeviceEvent,
        sysfs: SysfsNet,
        options: MatchOptions,
    ) -> Self {
        let identity = sysfs.resolve(&event.device_path);
        Self {
            source,
            devpath: event.device_path.clone(),
            dev_id: event.device_id.clone(),
            identity,
            sysfs,
            options,
        }
    }

    // The device node may not exist yet right after an add event, so a missing
    // identity is resolved again; a removed device falls back to the udev id.
    fn identifier(&self) -> String {
        self.identity
            .clone()
            .or_else(|| self.sysfs.resolve(&self.devpath))
            .unwrap_or_else(|| {
                debug!(
                    "No hardware address for {}, using device id {}",
                    self.devpath, self.dev_id
                );
                self.dev_id.clone()
            })
    }
}

impl UeventHandler for NetHandler<'_> {
    fn config(&self) -> Result<Document> {
        self.source.network_config()
    }

    fn detect(&self, action: Action) -> Result<bool> {
        let identifier = self.identifier();
        debug!("Checking if {} in netconfig", identifier);
        let state = NetworkState::parse(&self.config()?)?;
        detect(action, &identifier, &state, &self.options)
    }

    fn apply(&self) -> Result<()> {
        let config = self.config()?;
        self.source.apply_network_config(&config, true)
    }

    fn source(&self) -> &dyn Source {
        &*self.source
    }

    fn source_mut(&mut self) -> &mut dyn Source {
        &mut *self.source
    }
}

/// The closed table of subsystems that have a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    Net,
}

impl HandlerKind {
    pub fn for_subsystem(subsystem: Subsystem) -> Option<Self> {
        match subsystem {
            Subsystem::Net => Some(HandlerKind::Net),
            // TODO: block devices need a handler that correlates the device with
            // the instance's configured volumes.
            Subsystem::Block => None,
        }
    }

    pub fn build<'a>(
        self,
        source: &'a mut dyn Source,
        event: &DeviceEvent,
        sysfs: SysfsNet,
        options: MatchOptions,
    ) -> Box<dyn UeventHandler + 'a> {
        match self {
            HandlerKind::Net => Box::new(NetHandler::new(source, event, sysfs, options)),
        }
    }
}
