//! Configuration sources: the cached instance state and the metadata service
//! that refreshes it.

pub mod ec2;

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::fs::{LockFile, atomic_write};
use crate::netstate::Document;
use crate::renderer::{BsdRenderer, Distro, SystemRunner, current_sysname};
use crate::sysfs::SysfsNet;

use self::ec2::{Ec2Metadata, MetadataService};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Boot,
    Hotplug,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Boot => write!(f, "boot"),
            EventType::Hotplug => write!(f, "hotplug"),
        }
    }
}

pub trait Source {
    fn name(&self) -> &str;

    /// The current network configuration document. A source with no network
    /// configuration yields [`Error::ConfigParse`].
    fn network_config(&self) -> Result<Document>;

    /// Refresh metadata for the given events. Returns whether the source
    /// handled any of them; sources that support none are left untouched.
    fn update_metadata(&mut self, events: &[EventType]) -> Result<bool>;

    fn apply_network_config(&self, config: &Document, bring_up: bool) -> Result<()>;

    fn write_to_cache(&self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatasourceKind {
    Ec2,
    NoCloud,
}

impl DatasourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            DatasourceKind::Ec2 => "ec2",
            DatasourceKind::NoCloud => "nocloud",
        }
    }

    pub fn supported_events(&self) -> &'static [EventType] {
        match self {
            DatasourceKind::Ec2 => &[EventType::Boot, EventType::Hotplug],
            DatasourceKind::NoCloud => &[EventType::Boot],
        }
    }
}

/// State persisted by the boot-time run and updated after each successful
/// reconciliation.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceCache {
    pub datasource: DatasourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_config: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl InstanceCache {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let contents = fs::read_to_string(p).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                Error::SourceNotFound(format!("no instance cache at {}", p.display()))
            }
            _ => Error::SourceNotFound(format!("unable to read {}: {}", p.display(), e)),
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::SourceNotFound(format!("invalid instance cache {}: {}", p.display(), e))
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        let contents =
            serde_json::to_vec_pretty(self).map_err(|e| Error::cache_write(p, e.into()))?;
        let _lock = LockFile::acquire(p).map_err(|e| Error::cache_write(p, e))?;
        atomic_write(p, |mut f| {
            f.write_all(&contents)?;
            Ok(f.write_all(b"\n")?)
        })
        .map_err(|e| Error::cache_write(p, e))?;
        debug!("Wrote instance cache {}", p.display());
        Ok(())
    }
}

/// The datasource restored from the instance cache.
pub struct Datasource {
    cache: InstanceCache,
    cache_path: PathBuf,
    metadata: Option<Box<dyn MetadataService>>,
    distro: Distro,
}

impl Datasource {
    pub fn new(
        cache: InstanceCache,
        cache_path: PathBuf,
        metadata: Option<Box<dyn MetadataService>>,
        distro: Distro,
    ) -> Self {
        Self {
            cache,
            cache_path,
            metadata,
            distro,
        }
    }

    pub fn cache(&self) -> &InstanceCache {
        &self.cache
    }
}

/// Restore the datasource recorded in the instance cache.
pub fn fetch(settings: &Settings) -> Result<Datasource> {
    let cache = InstanceCache::load(&settings.cache_path)?;
    info!(
        "Restored {} datasource from {}",
        cache.datasource.name(),
        settings.cache_path.display()
    );
    let metadata: Option<Box<dyn MetadataService>> = match cache.datasource {
        DatasourceKind::Ec2 => Some(Box::new(Ec2Metadata::new(
            SysfsNet::new(&settings.sys_root),
            settings.imds_timeout,
        ))),
        DatasourceKind::NoCloud => None,
    };
    let base = BsdRenderer::new(&settings.target, settings.postcmds, Box::new(SystemRunner));
    let distro = Distro::new(settings.renderer, current_sysname(), base);
    Ok(Datasource::new(
        cache,
        settings.cache_path.clone(),
        metadata,
        distro,
    ))
}

impl Source for Datasource {
    fn name(&self) -> &str {
        self.cache.datasource.name()
    }

    fn network_config(&self) -> Result<Document> {
        self.cache
            .network_config
            .clone()
            .ok_or_else(|| Error::ConfigParse(format!("{} has no network config", self.name())))
    }

    fn update_metadata(&mut self, events: &[EventType]) -> Result<bool> {
        let supported = self.cache.datasource.supported_events();
        if !events.iter().any(|e| supported.contains(e)) {
            debug!("{} does not refresh on {:?}", self.name(), events);
            return Ok(false);
        }
        let Some(metadata) = &self.metadata else {
            debug!("{} has no metadata service", self.name());
            return Ok(false);
        };
        let config = metadata.network_config()?;
        self.cache.network_config = Some(config);
        self.cache.updated_at = Some(Utc::now().to_rfc3339());
        Ok(true)
    }

    fn apply_network_config(&self, config: &Document, bring_up: bool) -> Result<()> {
        self.distro.apply_network_config(config, bring_up)
    }

    fn write_to_cache(&self) -> Result<()> {
        self.cache.save(&self.cache_path)
    }
}
