use crate::config::GradeConfig;
use crate::store::Store;
use chrono::{Local, NaiveDateTime};
use serde::Serialize;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Source of "today" and "now" for grading-date decisions and `MODIFIED`.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> String {
        self.now().date().format(DATE_FORMAT).to_string()
    }

    fn timestamp(&self) -> String {
        self.now().format(TIMESTAMP_FORMAT).to_string()
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock pinned to one instant.
#[cfg(test)]
pub struct FixedClock(pub NaiveDateTime);

#[cfg(test)]
impl FixedClock {
    pub fn at_date(date: chrono::NaiveDate) -> Self {
        Self(date.and_hms_opt(12, 0, 0).unwrap_or_default())
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub level: Level,
    pub code: String,
    pub text: String,
}

/// Sink for non-fatal findings. Everything pushed here is also logged.
#[derive(Debug, Default)]
pub struct Messages {
    items: Vec<Message>,
}

impl Messages {
    pub fn warning(&mut self, code: &str, text: impl Into<String>) {
        let text = text.into();
        tracing::warn!(code, "{}", text);
        self.items.push(Message {
            level: Level::Warning,
            code: code.to_string(),
            text,
        });
    }

    pub fn error(&mut self, code: &str, text: impl Into<String>) {
        let text = text.into();
        tracing::error!(code, "{}", text);
        self.items.push(Message {
            level: Level::Error,
            code: code.to_string(),
            text,
        });
    }

    pub fn take(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.items)
    }

    #[cfg(test)]
    pub fn has_code(&self, code: &str) -> bool {
        self.items.iter().any(|m| m.code == code)
    }
}

/// Everything an operation needs: configuration, store, clock, sink.
pub struct Environment {
    pub config: GradeConfig,
    pub store: Store,
    pub clock: Box<dyn Clock>,
    pub messages: Messages,
}

impl Environment {
    pub fn new(config: GradeConfig, store: Store) -> Self {
        Self {
            config,
            store,
            clock: Box::new(SystemClock),
            messages: Messages::default(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }
}
