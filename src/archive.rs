//! Module for periodically archiving the current reading as a record document.
//!
//! The archiver thread writes one record right after start and then one record per interval,
//! where the interval is measured from the end of the previous run. Slow writes therefore
//! push every later record back by the time they took.
use std::io::{Cursor, ErrorKind, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, RwLock};
use std::thread::sleep;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use docx_rs::{Docx, Paragraph, Run};
use serde::{Deserialize, Serialize};

use crate::directory::{ArchiveDirectory, RECORD_PREFIX};
use crate::error::ArchiveError;
use crate::reading::Reading;
use crate::store::{ReadingSource, StateStore};

/// Format of the timestamp embedded in record names and record documents.
pub const RECORD_TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

const RECORD_TITLE: &str = "Irrigation Record";

/// Title size in half-points.
const RECORD_TITLE_SIZE: usize = 40;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// What the archiver does after a failed run.
pub enum FailurePolicy {
    /// Stop archiving for the rest of the process lifetime.
    Halt,
    /// Log the failure and try again after the next interval.
    Continue,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Continue
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters for the record archiver.
pub struct ArchiveParameters {
    /// Directory the records are written to.
    pub records_dir: std::path::PathBuf,
    /// Extension of the record files, without the dot. `docx` selects Word documents, any
    /// other extension gets plain UTF-8 text.
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Seconds between the end of one run and the start of the next.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Delete everything in `records_dir` before the first record is written.
    #[serde(default)]
    pub purge_on_startup: bool,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

fn default_extension() -> String {
    String::from("docx")
}

fn default_interval_secs() -> u64 {
    20 * 60
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchiverState {
    Idle,
    Archiving,
    Halted,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
/// Health of the archiver as seen from outside the thread.
pub struct ArchiverStatus {
    pub state: ArchiverState,
    pub runs: u64,
    pub failures: u64,
    pub last_record: Option<String>,
    pub last_error: Option<String>,
}

impl Default for ArchiverStatus {
    fn default() -> Self {
        ArchiverStatus {
            state: ArchiverState::Idle,
            runs: 0,
            failures: 0,
            last_record: None,
            last_error: None,
        }
    }
}

/// Archiver status shared between the archiver thread and its observers.
#[derive(Debug, Clone, Default)]
pub struct SharedStatus(Arc<RwLock<ArchiverStatus>>);

impl SharedStatus {
    pub fn snapshot(&self) -> ArchiverStatus {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn update<F: FnOnce(&mut ArchiverStatus)>(&self, f: F) {
        let mut status = self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut status);
    }
}

#[derive(Debug)]
/// Events emitted by the archiver thread.
pub enum ArchiveEvent {
    Archived { name: String, completed_at: Instant },
    Failed { error: String },
    Halted,
}

/// Formats a float the way the dashboard shows it: whole numbers keep one decimal.
fn format_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// Name of the record generated at `stamp`.
pub fn record_name(stamp: &NaiveDateTime, extension: &str) -> String {
    format!("{}{}.{}", RECORD_PREFIX, stamp.format(RECORD_TIMESTAMP_FORMAT), extension)
}

fn record_lines(reading: &Reading, stamp: &NaiveDateTime) -> [String; 7] {
    [
        format!("Timestamp: {}", stamp.format(RECORD_TIMESTAMP_FORMAT)),
        format!("Temperature: {} °C", format_value(reading.temperature)),
        format!("Humidity: {} %", format_value(reading.humidity)),
        format!("Soil Moisture: {} %", format_value(reading.soil_moisture)),
        format!("Soil pH: {}", format_value(reading.soil_ph)),
        format!("Light Intensity: {} lux", format_value(reading.light_intensity)),
        format!("Anomaly: {}", if reading.anomaly { "True" } else { "False" }),
    ]
}

/// Renders the plain text record for `reading` generated at `stamp`.
pub fn render(reading: &Reading, stamp: &NaiveDateTime) -> String {
    let mut document = format!("{}\n\n", RECORD_TITLE);
    for line in record_lines(reading, stamp).iter() {
        document.push_str(line);
        document.push('\n');
    }
    document
}

/// Renders the Word record for `reading` generated at `stamp`.
///
/// The title is a bold heading followed by one paragraph per field.
pub fn render_docx(reading: &Reading, stamp: &NaiveDateTime) -> Result<Vec<u8>, ArchiveError> {
    let title = Run::new().add_text(RECORD_TITLE).bold().size(RECORD_TITLE_SIZE);
    let mut docx = Docx::new().add_paragraph(Paragraph::new().add_run(title));
    for line in record_lines(reading, stamp).iter() {
        docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(line)));
    }

    let mut buffer = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buffer)
        .map_err(|err| ArchiveError::Render(err.to_string()))?;
    Ok(buffer.into_inner())
}

/// Renders the record in the format selected by `extension`.
fn render_record(
    reading: &Reading,
    stamp: &NaiveDateTime,
    extension: &str,
) -> Result<Vec<u8>, ArchiveError> {
    if extension.eq_ignore_ascii_case("docx") {
        render_docx(reading, stamp)
    } else {
        Ok(render(reading, stamp).into_bytes())
    }
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send>;

/// Turns the current reading into record files.
pub struct Archiver {
    store: Arc<StateStore>,
    directory: Arc<ArchiveDirectory>,
    source: Option<Box<dyn ReadingSource + Send>>,
    clock: Clock,
}

impl Archiver {
    pub fn new(store: Arc<StateStore>, directory: Arc<ArchiveDirectory>) -> Self {
        Archiver {
            store,
            directory,
            source: None,
            clock: Box::new(|| Local::now().naive_local()),
        }
    }

    /// Fills a missing reading document from `source` before archiving.
    pub fn with_source(mut self, source: Box<dyn ReadingSource + Send>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + Send + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    /// Archives the current reading once.
    ///
    /// # Returns
    ///
    /// * `Ok(name)` - Filename of the new record.
    ///
    /// * `Err(RecordExists)` - A record with the same timestamp exists. It is left untouched.
    ///
    /// * `Err(Io)` - The record could not be created or written. Nothing is left behind.
    ///
    /// * `Err(Render)` - The record document could not be generated.
    ///
    pub fn run_once(&self) -> Result<String, ArchiveError> {
        let reading = match &self.source {
            Some(source) => self.store.load_or_populate(source.as_ref()),
            None => self.store.load(),
        };

        let stamp = (self.clock)();
        let name = record_name(&stamp, self.directory.extension());
        let path = self.directory.path().join(&name);
        let document = render_record(&reading, &stamp, self.directory.extension())?;

        let io_error = |source| ArchiveError::Io {
            path: path.clone(),
            source,
        };

        // The record only appears under its name once it is complete.
        let mut temp_file = tempfile::Builder::new()
            .prefix(".")
            .suffix(".part")
            .tempfile_in(self.directory.path())
            .map_err(io_error)?;
        temp_file.write_all(&document).map_err(io_error)?;
        temp_file.as_file().sync_all().map_err(io_error)?;
        temp_file
            .persist_noclobber(&path)
            .map_err(|err| match err.error.kind() {
                ErrorKind::AlreadyExists => ArchiveError::RecordExists(name.clone()),
                _ => io_error(err.error),
            })?;

        log::info!(target: "irrigd::archive", "Archived reading as \'{}\'", name);
        Ok(name)
    }
}

/// Sleeps for `duration` in short slices, returning early once `thread_finish` is set.
///
/// # Returns
///
/// * `true` if the full duration elapsed.
///
fn sleep_unless_finished(duration: Duration, thread_finish: &AtomicBool) -> bool {
    let slice = Duration::from_millis(100);
    let deadline = Instant::now() + duration;

    loop {
        if thread_finish.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        sleep(std::cmp::min(slice, deadline - now));
    }
}

fn notify(events: &Option<Sender<ArchiveEvent>>, event: ArchiveEvent) {
    if let Some(tx) = events {
        if tx.send(event).is_err() {
            log::trace!(target: "irrigd::archive", "No listener for archive events");
        }
    }
}

/// Thread function for the archiver.
///
/// Runs `archiver` immediately and then once per `interval` until `thread_finish` is set.
///
/// # Arguments
///
/// * `archiver` - The archiver to run.
///
/// * `interval` - Pause between the end of one run and the start of the next.
///
/// * `policy` - What to do after a failed run.
///
/// * `thread_finish` - Indicates that the thread should finish operation and should return.
///
/// * `status` - Updated on every state change.
///
/// * `events` - Optional channel receiving an event per run.
///
pub fn archive_thread(
    archiver: Archiver,
    interval: Duration,
    policy: FailurePolicy,
    thread_finish: Arc<AtomicBool>,
    status: SharedStatus,
    events: Option<Sender<ArchiveEvent>>,
) {
    log::info!(
        target: "irrigd::archive",
        "Archiving every {}s to \'{}\'",
        interval.as_secs(),
        archiver.directory.path().display()
    );

    while !thread_finish.load(Ordering::SeqCst) {
        status.update(|status| status.state = ArchiverState::Archiving);

        match archiver.run_once() {
            Ok(name) => {
                status.update(|status| {
                    status.state = ArchiverState::Idle;
                    status.runs += 1;
                    status.last_record = Some(name.clone());
                });
                notify(&events, ArchiveEvent::Archived {
                    name,
                    completed_at: Instant::now(),
                });
            }
            Err(err) => {
                let message = err.to_string();
                status.update(|status| {
                    status.failures += 1;
                    status.last_error = Some(message.clone());
                    status.state = match policy {
                        FailurePolicy::Halt => ArchiverState::Halted,
                        FailurePolicy::Continue => ArchiverState::Idle,
                    };
                });
                notify(&events, ArchiveEvent::Failed { error: message });

                if policy == FailurePolicy::Halt {
                    log::error!(
                        target: "irrigd::archive",
                        "Archiving failed, no further records will be written: \'{}\'",
                        err
                    );
                    notify(&events, ArchiveEvent::Halted);
                    return;
                }
                log::error!(
                    target: "irrigd::archive",
                    "Archiving failed, retrying after the next interval: \'{}\'",
                    err
                );
            }
        }

        if !sleep_unless_finished(interval, &thread_finish) {
            break;
        }
    }

    log::info!(target: "irrigd::archive", "Archiver stopped");
}
