//! Live log tailing.
//!
//! [`LogTailer`] follows one append-only log file: it reads newly written
//! bytes on each poll, holds back an incomplete trailing line until the rest
//! arrives, reopens from the start when the file shrinks (truncation), and
//! switches to the next day-stamped file when one appears. [`LogWatcher`]
//! runs a tailer on a background thread, feeding a [`SessionStore`].

use chrono::Utc;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::EddResult;
use crate::event::{day_log_path, Event, LineParser};
use crate::session::SessionStore;

pub struct LogTailer {
    dir: PathBuf,
    prefix: String,
    current: PathBuf,
    offset: u64,
    partial: String,
    parser: LineParser,
}

impl LogTailer {
    /// Tail the newest day-stamped log under `dir` (today's path if none
    /// exists yet). Polling starts returning events once the file appears.
    pub fn new(dir: &Path, prefix: &str) -> Self {
        let current = newest_day_file(dir, prefix)
            .unwrap_or_else(|| day_log_path(dir, prefix, Utc::now().date_naive()));
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            current,
            offset: 0,
            partial: String::new(),
            parser: LineParser::new(),
        }
    }

    /// Tail a single fixed file, without day rollover. Used in tests and for
    /// explicitly named logs.
    pub fn for_file(path: &Path) -> Self {
        Self {
            dir: path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf(),
            prefix: String::new(),
            current: path.to_path_buf(),
            offset: 0,
            partial: String::new(),
            parser: LineParser::new(),
        }
    }

    pub fn current_path(&self) -> &Path {
        &self.current
    }

    /// Parse warnings accumulated since the last call.
    pub fn take_warnings(&mut self) -> u64 {
        self.parser.take_warnings()
    }

    /// Read and parse everything appended since the last poll. At day
    /// rollover the old file is drained to its end before the tailer
    /// switches, so nothing written just before midnight is lost.
    pub fn poll_events(&mut self) -> EddResult<Vec<Event>> {
        let mut events = self.read_appended()?;
        if self.roll_over_if_newer() {
            events.extend(self.read_appended()?);
        }
        Ok(events)
    }

    /// Read newly appended bytes of the current file into events.
    fn read_appended(&mut self) -> EddResult<Vec<Event>> {
        let mut file = match File::open(&self.current) {
            Ok(f) => f,
            // Not created yet; nothing to read.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            warn!(path = %self.current.display(), "Log file shrank, re-reading from start");
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut chunk = String::new();
        file.take(len - self.offset).read_to_string(&mut chunk)?;
        self.offset = len;

        let mut buffered = std::mem::take(&mut self.partial);
        buffered.push_str(&chunk);

        let mut events = Vec::new();
        while let Some(newline) = buffered.find('\n') {
            let line: String = buffered.drain(..=newline).collect();
            if let Some(event) = self.parser.parse_line(line.trim_end()) {
                events.push(event);
            }
        }
        // Whatever remains has no terminator yet; keep it for the next poll.
        self.partial = buffered;
        Ok(events)
    }

    /// Switch to a newer day-stamped file once one exists. Only called
    /// after the current file has been drained; an unterminated trailing
    /// line of the old file is dropped, as it would be at end of file.
    fn roll_over_if_newer(&mut self) -> bool {
        if self.prefix.is_empty() {
            return false;
        }
        let Some(newest) = newest_day_file(&self.dir, &self.prefix) else {
            return false;
        };
        // Day-stamped names sort chronologically.
        if newest.file_name() <= self.current.file_name() {
            return false;
        }
        info!(
            from = %self.current.display(),
            to = %newest.display(),
            "Log rolled over to a new day"
        );
        self.current = newest;
        self.offset = 0;
        self.partial.clear();
        true
    }
}

/// The lexicographically last `{prefix}-*.log` in a directory, which is the
/// newest day file.
fn newest_day_file(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension().is_some_and(|ext| ext == "log")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&format!("{prefix}-")))
        })
        .max()
}

/// Handle to a background tailing thread. Dropping without `stop()` detaches
/// the thread; callers that care about shutdown order should stop explicitly.
pub struct WatcherHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub struct LogWatcher;

impl LogWatcher {
    /// Poll the tailer on a background thread, appending every event into
    /// the store until stopped. Sessions with no append for `max_idle` are
    /// evicted to bound memory on long watches.
    pub fn spawn(
        mut tailer: LogTailer,
        store: SessionStore,
        poll: Duration,
        max_idle: Duration,
    ) -> WatcherHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let join = thread::spawn(move || {
            debug!(path = %tailer.current_path().display(), "Log watcher started");
            while !flag.load(Ordering::Relaxed) {
                match tailer.poll_events() {
                    Ok(events) => {
                        for event in events {
                            store.append(event);
                        }
                        store.record_warnings(tailer.take_warnings());
                    }
                    Err(e) => warn!(error = %e, "Log poll failed"),
                }
                store.evict_idle(max_idle);
                thread::sleep(poll);
            }
            debug!("Log watcher stopped");
        });
        WatcherHandle {
            stop,
            join: Some(join),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn line(session: &str, tool: &str) -> String {
        format!(
            r#"{{"timestamp":"2026-01-15T10:00:00Z","session_id":"{session}","event_type":"tool_call","tool_name":"{tool}","input":{{}}}}"#
        )
    }

    #[test]
    fn partial_trailing_line_waits_for_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        let mut file = File::create(&path).unwrap();
        let full = line("s1", "exec");
        let (head, tail) = full.split_at(20);
        write!(file, "{head}").unwrap();
        file.flush().unwrap();

        let mut tailer = LogTailer::for_file(&path);
        assert!(tailer.poll_events().unwrap().is_empty());

        writeln!(file, "{tail}").unwrap();
        file.flush().unwrap();
        let events = tailer.poll_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tool_name.as_deref(), Some("exec"));
        assert_eq!(tailer.take_warnings(), 0);
    }

    #[test]
    fn truncation_rereads_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        std::fs::write(&path, format!("{}\n{}\n", line("s1", "exec"), line("s1", "exec"))).unwrap();

        let mut tailer = LogTailer::for_file(&path);
        assert_eq!(tailer.poll_events().unwrap().len(), 2);

        std::fs::write(&path, format!("{}\n", line("s2", "get_weather"))).unwrap();
        let events = tailer.poll_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session_id, "s2");
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut tailer = LogTailer::for_file(&dir.path().join("absent.log"));
        assert!(tailer.poll_events().unwrap().is_empty());
    }

    #[test]
    fn spawned_watcher_feeds_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        std::fs::write(&path, format!("{}\n", line("s1", "exec"))).unwrap();

        let store = SessionStore::new();
        let handle = LogWatcher::spawn(
            LogTailer::for_file(&path),
            store.clone(),
            Duration::from_millis(10),
            Duration::from_secs(3600),
        );
        for _ in 0..100 {
            if !store.session_ids().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        handle.stop();
        assert_eq!(store.session_ids(), vec!["s1"]);
    }

    #[test]
    fn day_rollover_drains_the_old_file_first() {
        let dir = tempfile::tempdir().unwrap();
        let day_one = dir.path().join("agent-2026-08-01.log");
        std::fs::write(&day_one, format!("{}\n", line("s1", "exec"))).unwrap();

        let mut tailer = LogTailer::new(dir.path(), "agent");
        assert_eq!(tailer.current_path(), day_one.as_path());
        assert_eq!(tailer.poll_events().unwrap().len(), 1);

        // A late write lands on the old file in the same instant the new
        // day's file appears. One poll must surface both.
        let mut old = std::fs::OpenOptions::new().append(true).open(&day_one).unwrap();
        writeln!(old, "{}", line("s1", "get_weather")).unwrap();
        let day_two = dir.path().join("agent-2026-08-02.log");
        std::fs::write(&day_two, format!("{}\n", line("s2", "exec"))).unwrap();

        let events = tailer.poll_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tool_name.as_deref(), Some("get_weather"));
        assert_eq!(events[1].session_id, "s2");
        assert_eq!(tailer.current_path(), day_two.as_path());
    }

    #[test]
    fn spawned_watcher_evicts_idle_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        std::fs::write(&path, format!("{}\n", line("s1", "exec"))).unwrap();

        let store = SessionStore::new();
        let handle = LogWatcher::spawn(
            LogTailer::for_file(&path),
            store.clone(),
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        let mut seen = false;
        for _ in 0..100 {
            if !store.session_ids().is_empty() {
                seen = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(seen, "watcher never appended the session");

        // No further appends; the watcher's idle sweep drops the buffer.
        for _ in 0..100 {
            if store.session_ids().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        handle.stop();
        assert!(store.session_ids().is_empty());
    }
}
