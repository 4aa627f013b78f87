//! Bounded in-memory log shared by every component.
//!
//! Storage is bounded by the total length of the text held, not by the record
//! count: a new record evicts as many of the oldest ones as it needs. Records
//! can also be echoed to a print sink, the JTAG console on the device.

use alloc::{boxed::Box, collections::VecDeque, string::String};
use core::{
    cell::{Ref, RefCell},
    fmt,
};
use embassy_time::Instant;

const OVERSIZE_NOTICE: &str = "log discarded: too large for storage";

/// Receives every new record at or above the print level.
pub type PrintSink = fn(&Record);

/// Creates a logger holding at most `capacity` characters of text.
///
/// Panics if `capacity` cannot fit the notice that replaces oversized records.
pub fn init(capacity: usize) -> SharedLogger {
    assert!(
        capacity >= OVERSIZE_NOTICE.len(),
        "memlog needs at least {} characters",
        OVERSIZE_NOTICE.len()
    );

    let buffer = LogBuffer {
        records: VecDeque::new(),
        used: 0,
        capacity,
        sink: None,
        print_level: Level::Debug,
    };
    SharedLogger {
        buffer: Box::leak(Box::new(RefCell::new(buffer))),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "DEBG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERRO",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Clone, Debug)]
pub struct Record {
    pub instant: Instant,
    pub level: Level,
    pub text: String,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", Uptime(self.instant), self.level, self.text)
    }
}

/// Renders an instant as time since boot, `HHHHH:MM:SS.mmm`.
#[derive(Clone, Copy)]
pub struct Uptime(pub Instant);

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        let seconds = millis / 1000;
        write!(
            f,
            "{:05}:{:02}:{:02}.{:03}",
            seconds / 3600,
            seconds / 60 % 60,
            seconds % 60,
            millis % 1000
        )
    }
}

struct LogBuffer {
    // Oldest first.
    records: VecDeque<Record>,
    // Characters of text currently held.
    used: usize,
    capacity: usize,
    sink: Option<PrintSink>,
    print_level: Level,
}

impl LogBuffer {
    fn push(&mut self, level: Level, text: String) {
        if text.len() > self.capacity {
            return self.push(Level::Warn, String::from(OVERSIZE_NOTICE));
        }

        while self.capacity - self.used < text.len() {
            let Some(evicted) = self.records.pop_front() else {
                break;
            };
            self.used -= evicted.text.len();
        }
        self.used += text.len();

        let record = Record {
            instant: Instant::now(),
            level,
            text,
        };

        match self.sink {
            Some(sink) if level >= self.print_level => sink(&record),
            _ => (),
        }

        self.records.push_back(record);
    }
}

/// Cheap to copy; every task holds its own.
#[derive(Clone, Copy)]
pub struct SharedLogger {
    buffer: &'static RefCell<LogBuffer>,
}

impl SharedLogger {
    pub fn log(&self, level: Level, text: impl Into<String>) {
        self.buffer.borrow_mut().push(level, text.into());
    }

    pub fn debug(&self, text: impl Into<String>) {
        self.log(Level::Debug, text);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.log(Level::Info, text);
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.log(Level::Warn, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.log(Level::Error, text);
    }

    /// Echoes new records to `sink`.
    pub fn enable_print(&self, sink: PrintSink) {
        self.buffer.borrow_mut().sink = Some(sink);
    }

    /// Records below `level` are stored but not printed.
    pub fn set_print_level(&self, level: Level) {
        self.buffer.borrow_mut().print_level = level;
    }

    /// Stored records, oldest first.
    pub fn records(&self) -> Ref<'_, VecDeque<Record>> {
        Ref::map(self.buffer.borrow(), |buffer| &buffer.records)
    }

    /// True if a stored record at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|record| record.level == level && record.text.contains(needle))
    }
}
