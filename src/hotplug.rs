//! The reconciliation loop: refresh metadata, check that the configuration
//! agrees with the event, then apply it.

use std::path::Path;

use log::{debug, info, warn};

use crate::backoff::{RetrySchedule, Sleeper};
use crate::config::Settings;
use crate::constants;
use crate::error::{Error, Result};
use crate::source::{EventType, Source};
use crate::sysfs::SysfsNet;
use crate::uevent::{Action, ChangePolicy, DeviceEvent, HandlerKind, Subsystem, UeventHandler};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Fetching,
    Detecting,
    Applying,
    Done,
}

/// Outcome of a run that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Reconciled { attempts: usize },
    /// A change event ignored by policy.
    Skipped,
    /// No handler exists for the subsystem.
    Unsupported,
}

impl Status {
    pub fn exit_code(&self) -> u8 {
        match self {
            Status::Reconciled { .. } | Status::Skipped => constants::EXIT_SUCCESS,
            Status::Unsupported => constants::EXIT_UNHANDLED,
        }
    }
}

fn attempt(handler: &mut dyn UeventHandler, action: Action) -> Result<()> {
    let mut phase = Phase::Fetching;
    debug!("{:?}", phase);
    handler.source_mut().update_metadata(&[EventType::Hotplug])?;

    phase = Phase::Detecting;
    debug!("{:?}", phase);
    if !handler.detect(action)? {
        return Err(Error::DetectionFailed);
    }

    phase = Phase::Applying;
    debug!("{:?}", phase);
    handler.apply()?;
    handler.source().write_to_cache()?;

    phase = Phase::Done;
    debug!("{:?}", phase);
    Ok(())
}

/// Run attempts until one succeeds, sleeping the scheduled wait after each
/// failure. Returns the number of attempts made, or the last error once the
/// schedule is exhausted.
pub fn reconcile(
    handler: &mut dyn UeventHandler,
    action: Action,
    schedule: &RetrySchedule,
    sleeper: &mut dyn Sleeper,
) -> Result<usize> {
    let attempts = schedule.attempts();
    let mut last_error = Error::DetectionFailed;
    for (i, wait) in schedule.waits().iter().enumerate() {
        let n = i + 1;
        match attempt(handler, action) {
            Ok(()) => {
                info!("Reconciled {} event on attempt {}/{}", action, n, attempts);
                return Ok(n);
            }
            Err(e) => {
                warn!("Attempt {}/{} failed: {}", n, attempts, e);
                last_error = e;
            }
        }
        sleeper.sleep(*wait);
    }
    Err(last_error)
}

/// Settings for an event on `subsystem`. Subsystems without a handler never
/// read the configuration, so they fall back to defaults when it is invalid.
pub fn load_settings<P: AsRef<Path>>(subsystem: Subsystem, path: P) -> Result<Settings> {
    match Settings::load(path) {
        Err(e) if HandlerKind::for_subsystem(subsystem).is_none() => {
            warn!("Ignoring configuration for subsystem {}: {}", subsystem, e);
            Ok(Settings::default())
        }
        result => result,
    }
}

/// Handle one hot-plug event. The source is only loaded once the event is
/// known to need one.
pub fn handle_event<F>(
    event: &DeviceEvent,
    settings: &Settings,
    load_source: F,
    sleeper: &mut dyn Sleeper,
) -> Result<Status>
where
    F: FnOnce(&Settings) -> Result<Box<dyn Source>>,
{
    let Some(kind) = HandlerKind::for_subsystem(event.subsystem) else {
        warn!("No handler for subsystem {}", event.subsystem);
        return Ok(Status::Unsupported);
    };
    if event.action == Action::Change
        && settings.match_options.change_policy == ChangePolicy::Ignore
    {
        info!("Ignoring change event for {}", event.device_path);
        return Ok(Status::Skipped);
    }

    let mut source = load_source(settings)?;
    debug!("Using {} datasource", source.name());
    let mut handler = kind.build(
        source.as_mut(),
        event,
        SysfsNet::new(&settings.sys_root),
        settings.match_options,
    );
    let attempts = reconcile(
        handler.as_mut(),
        event.action,
        &settings.retry_schedule,
        sleeper,
    )?;
    Ok(Status::Reconciled { attempts })
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    use super::*;
    use crate::backoff::RecordingSleeper;
    use crate::source::test::FakeSource;
    use crate::sysfs::fake_sysfs;
    use crate::uevent::MatchOptions;

    fn with_mac(mac: &str) -> Value {
        json!({
            "version": 1,
            "config": [{
                "type": "physical",
                "name": "eth1",
                "mac_address": mac,
                "subnets": [{"type": "dhcp"}]
            }]
        })
    }

    fn without_device() -> Value {
        json!({"version": 1, "config": []})
    }

    fn event(subsystem: Subsystem, action: Action) -> DeviceEvent {
        DeviceEvent {
            device_path: "/devices/virtual/net/eth1".into(),
            device_id: "n3".into(),
            subsystem,
            action,
        }
    }

    fn run(source: &mut FakeSource, sys_mac: &str, action: Action) -> (Result<usize>, Duration) {
        let sys = fake_sysfs(&[("eth1", sys_mac)]);
        let mut sleeper = RecordingSleeper::new();
        let result = {
            let mut handler = HandlerKind::Net.build(
                source,
                &event(Subsystem::Net, action),
                SysfsNet::new(sys.path()),
                MatchOptions::default(),
            );
            reconcile(
                handler.as_mut(),
                action,
                &RetrySchedule::default(),
                &mut sleeper,
            )
        };
        (result, sleeper.total())
    }

    #[test]
    fn test_present_on_first_attempt() {
        let config = with_mac("aa:bb:cc:dd:ee:ff");
        let mut source = FakeSource::with_configs(vec![config.clone()]);
        let (result, waited) = run(&mut source, "aa:bb:cc:dd:ee:ff\n", Action::Add);
        assert_eq!(1, result.unwrap());
        assert_eq!(Duration::ZERO, waited);
        assert_eq!(vec![(config, true)], source.applied());
        assert_eq!(1, source.cache_writes.get());
    }

    #[test]
    fn test_present_on_fifth_refresh() {
        let config = with_mac("11:22:33:44:55:66");
        let mut configs = vec![without_device(); 5];
        configs.push(config.clone());
        let mut source = FakeSource::with_configs(configs);
        let (result, waited) = run(&mut source, "11:22:33:44:55:66", Action::Add);
        assert_eq!(5, result.unwrap());
        assert_eq!(Duration::from_secs(6), waited);
        assert_eq!(5, source.refreshes);
        assert_eq!(vec![(config, true)], source.applied());
    }

    #[test]
    fn test_never_detected() {
        let mut source = FakeSource::with_configs(vec![without_device()]);
        let (result, waited) = run(&mut source, "aa:bb:cc:dd:ee:ff", Action::Add);
        assert!(matches!(result, Err(Error::DetectionFailed)));
        assert_eq!(Duration::from_secs(11), waited);
        assert_eq!(5, source.refreshes);
        assert!(source.applied().is_empty());
        assert_eq!(0, source.cache_writes.get());
    }

    #[test]
    fn test_malformed_config_propagates() {
        let mut source = FakeSource::with_configs(vec![json!({"config": []})]);
        let (result, waited) = run(&mut source, "aa:bb:cc:dd:ee:ff", Action::Add);
        assert!(matches!(result, Err(Error::ConfigParse(_))));
        assert_eq!(Duration::from_secs(11), waited);
        assert!(source.applied().is_empty());
    }

    #[test]
    fn test_refresh_failures_are_retried() {
        let mut source = FakeSource::with_configs(vec![with_mac("aa:bb:cc:dd:ee:ff")]);
        source.refresh_failures = 2;
        let (result, waited) = run(&mut source, "aa:bb:cc:dd:ee:ff", Action::Add);
        assert_eq!(3, result.unwrap());
        assert_eq!(Duration::from_secs(2), waited);
        assert_eq!(1, source.applied().len());
    }

    #[test]
    fn test_apply_failure_is_retried() {
        let mut source = FakeSource::with_configs(vec![with_mac("aa:bb:cc:dd:ee:ff")]);
        source.apply_failures = usize::MAX;
        let (result, waited) = run(&mut source, "aa:bb:cc:dd:ee:ff", Action::Add);
        assert!(matches!(result, Err(Error::OsCommand { .. })));
        assert_eq!(Duration::from_secs(11), waited);
        assert_eq!(5, source.refreshes);
        assert_eq!(5, source.applied().len());
        assert_eq!(0, source.cache_writes.get());
    }

    #[test]
    fn test_transient_apply_failure() {
        let mut source = FakeSource::with_configs(vec![with_mac("aa:bb:cc:dd:ee:ff")]);
        source.apply_failures = 1;
        let (result, waited) = run(&mut source, "aa:bb:cc:dd:ee:ff", Action::Add);
        assert_eq!(2, result.unwrap());
        assert_eq!(Duration::from_secs(1), waited);
        assert_eq!(2, source.applied().len());
        assert_eq!(1, source.cache_writes.get());
    }

    #[test]
    fn test_cache_write_failure_is_retried() {
        let mut source = FakeSource::with_configs(vec![with_mac("aa:bb:cc:dd:ee:ff")]);
        source.cache_write_failures = 2;
        let (result, waited) = run(&mut source, "aa:bb:cc:dd:ee:ff", Action::Add);
        assert_eq!(3, result.unwrap());
        assert_eq!(Duration::from_secs(2), waited);
        assert_eq!(3, source.applied().len());
        assert_eq!(3, source.cache_writes.get());
    }

    #[test]
    fn test_remove_when_absent() {
        let mut source = FakeSource::with_configs(vec![without_device()]);
        let (result, _) = run(&mut source, "aa:bb:cc:dd:ee:ff", Action::Remove);
        assert_eq!(1, result.unwrap());
    }

    #[test]
    fn test_change_rejected_by_default() {
        let mut source = FakeSource::with_configs(vec![with_mac("aa:bb:cc:dd:ee:ff")]);
        let (result, waited) = run(&mut source, "aa:bb:cc:dd:ee:ff", Action::Change);
        assert!(matches!(result, Err(Error::InvalidAction(a)) if a == "change"));
        assert_eq!(Duration::from_secs(11), waited);
    }

    #[test]
    fn test_handle_event_block_unsupported() {
        let loaded = Cell::new(false);
        let mut sleeper = RecordingSleeper::new();
        let status = handle_event(
            &event(Subsystem::Block, Action::Add),
            &Settings::default(),
            |_| {
                loaded.set(true);
                Ok(Box::new(FakeSource::default()))
            },
            &mut sleeper,
        )
        .unwrap();
        assert_eq!(Status::Unsupported, status);
        assert_eq!(1, status.exit_code());
        assert!(!loaded.get());
    }

    #[test]
    fn test_load_settings_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotplug.yaml");
        std::fs::write(&path, "retry-schedule: [").unwrap();

        let settings = load_settings(Subsystem::Block, &path).unwrap();
        assert_eq!(Settings::default(), settings);
        let mut sleeper = RecordingSleeper::new();
        let status = handle_event(
            &event(Subsystem::Block, Action::Add),
            &settings,
            |_| Err(Error::SourceNotFound("unexpected".into())),
            &mut sleeper,
        )
        .unwrap();
        assert_eq!(1, status.exit_code());

        let err = load_settings(Subsystem::Net, &path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(2, err.exit_code());
    }

    #[test]
    fn test_handle_event_change_ignored() {
        let mut settings = Settings::default();
        settings.match_options.change_policy = ChangePolicy::Ignore;
        let mut sleeper = RecordingSleeper::new();
        let status = handle_event(
            &event(Subsystem::Net, Action::Change),
            &settings,
            |_| Err(Error::SourceNotFound("unexpected".into())),
            &mut sleeper,
        )
        .unwrap();
        assert_eq!(Status::Skipped, status);
        assert_eq!(0, status.exit_code());
    }

    #[test]
    fn test_handle_event_no_source() {
        let mut sleeper = RecordingSleeper::new();
        let err = handle_event(
            &event(Subsystem::Net, Action::Add),
            &Settings::default(),
            |_| Err(Error::SourceNotFound("no instance cache".into())),
            &mut sleeper,
        )
        .unwrap_err();
        assert_eq!(1, err.exit_code());
    }

    #[test]
    fn test_handle_event_reconciled() {
        let sys = fake_sysfs(&[("eth1", "aa:bb:cc:dd:ee:ff")]);
        let settings = Settings {
            sys_root: sys.path().to_path_buf(),
            ..Default::default()
        };
        let mut sleeper = RecordingSleeper::new();
        let status = handle_event(
            &event(Subsystem::Net, Action::Add),
            &settings,
            |_| {
                Ok(Box::new(FakeSource::with_configs(vec![with_mac(
                    "aa:bb:cc:dd:ee:ff",
                )])))
            },
            &mut sleeper,
        )
        .unwrap();
        assert_eq!(Status::Reconciled { attempts: 1 }, status);
        assert_eq!(0, status.exit_code());
    }

    #[test]
    fn test_handle_event_exhausted() {
        let sys = fake_sysfs(&[("eth1", "aa:bb:cc:dd:ee:ff")]);
        let settings = Settings {
            sys_root: sys.path().to_path_buf(),
            retry_schedule: RetrySchedule::from_secs(&[0, 0]).unwrap(),
            ..Default::default()
        };
        let mut sleeper = RecordingSleeper::new();
        let err = handle_event(
            &event(Subsystem::Net, Action::Add),
            &settings,
            |_| Ok(Box::new(FakeSource::with_configs(vec![without_device()]))),
            &mut sleeper,
        )
        .unwrap_err();
        assert!(matches!(err, Error::DetectionFailed));
        assert_eq!(2, err.exit_code());
        assert_eq!(2, sleeper.slept.len());
    }
}
