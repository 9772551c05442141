//! Start and finish events for a hook run, logged and optionally appended to
//! a JSON-lines file.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use log::{info, warn};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportResult {
    Success,
    Warn,
    Fail,
}

impl fmt::Display for ReportResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReportResult::Success => "SUCCESS",
            ReportResult::Warn => "WARN",
            ReportResult::Fail => "FAIL",
        })
    }
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
struct ReportEvent<'a> {
    event_type: &'a str,
    name: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ReportResult>,
    timestamp: String,
}

#[derive(Debug)]
pub struct ReportEventStack {
    name: String,
    description: String,
    events_file: Option<PathBuf>,
    result: ReportResult,
    finished: bool,
}

impl ReportEventStack {
    pub fn new(name: &str, description: &str, events_file: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            events_file,
            result: ReportResult::Success,
            finished: false,
        }
    }

    pub fn start(&self) {
        info!("start: {}: {}", self.name, self.description);
        self.emit("start", None);
    }

    pub fn set_result(&mut self, result: ReportResult, description: &str) {
        self.result = result;
        self.description = description.into();
    }

    pub fn result(&self) -> ReportResult {
        self.result
    }

    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        match self.result {
            ReportResult::Success => {
                info!("finish: {}: {}: {}", self.name, self.result, self.description)
            }
            _ => warn!("finish: {}: {}: {}", self.name, self.result, self.description),
        }
        self.emit("finish", Some(self.result));
    }

    // Reporting never fails the hook; write errors are only logged.
    fn emit(&self, event_type: &str, result: Option<ReportResult>) {
        let Some(path) = &self.events_file else {
            return;
        };
        let event = ReportEvent {
            event_type,
            name: &self.name,
            description: &self.description,
            result,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let written = serde_json::to_string(&event)
            .map_err(std::io::Error::from)
            .and_then(|line| {
                let mut f = OpenOptions::new().create(true).append(true).open(path)?;
                writeln!(f, "{}", line)
            });
        if let Err(e) = written {
            warn!("unable to write event to {}: {}", path.display(), e);
        }
    }
}

impl Drop for ReportEventStack {
    fn drop(&mut self) {
        self.finish();
    }
}
