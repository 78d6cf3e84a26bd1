/// On-disk event log.
///
/// Layout under the data directory:
///
/// ```text
/// events.jsonl                          one JSON event per line
/// checkpoints/checkpoint-<seq>.json     belief state as of <seq>, zero-padded to 20 digits
/// ```
///
/// A record counts only once its trailing newline is on disk. Every append
/// is followed by `sync_data`, and a failed append is truncated away before
/// the call returns.
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::belief::BeliefState;
use crate::constants::DEFAULT_RETAIN_CHECKPOINTS;
use crate::error::{DurabilityError, WalError};
use crate::event_log::{EventLog, EventStream, LogStats};
use crate::types::{Event, EventPayload};

const EVENTS_FILE: &str = "events.jsonl";
const CHECKPOINT_DIR: &str = "checkpoints";
const CHECKPOINT_PREFIX: &str = "checkpoint-";
const CHECKPOINT_SUFFIX: &str = ".json";
const TMP_SUFFIX: &str = ".tmp";

/// One replay index entry is kept per this many events.
const INDEX_STRIDE: u64 = 256;

#[derive(Debug, Clone)]
pub struct FileLogOptions {
    /// Checkpoints kept after a new one is written. At least one is always kept.
    pub retain_checkpoints: usize,
}

impl Default for FileLogOptions {
    fn default() -> Self {
        FileLogOptions { retain_checkpoints: DEFAULT_RETAIN_CHECKPOINTS }
    }
}

pub struct FileLog {
    dir: PathBuf,
    events_path: PathBuf,
    checkpoint_dir: PathBuf,
    retain_checkpoints: usize,
    appender: Mutex<Appender>,
    last_sequence: AtomicU64,
    durable_len: AtomicU64,
}

struct Appender {
    file: File,
    next_sequence: u64,
    /// Byte length of the log covering every acknowledged event.
    len: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: bool,
    /// `(sequence, byte offset of that record)`, one per `INDEX_STRIDE` events.
    index: Vec<(u64, u64)>,
}

/// Result of scanning the events file on open.
struct Scan {
    valid_len: u64,
    last_sequence: u64,
    index: Vec<(u64, u64)>,
}

impl FileLog {
    /// Open (or create) the log in `dir`.
    ///
    /// An incomplete or unparsable final record is a torn write from a crash
    /// and is truncated. Damage anywhere else is reported as corruption.
    pub fn open(dir: impl AsRef<Path>, options: FileLogOptions) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        let checkpoint_dir = dir.join(CHECKPOINT_DIR);
        fs::create_dir_all(&checkpoint_dir)?;
        remove_stale_temp_files(&checkpoint_dir)?;

        let events_path = dir.join(EVENTS_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&events_path)?;
        let on_disk = file.metadata()?.len();

        let scan = scan_events(&events_path)?;
        if scan.valid_len < on_disk {
            warn!(
                "Truncating torn tail of {}: {} bytes after sequence {}",
                events_path.display(),
                on_disk - scan.valid_len,
                scan.last_sequence
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        sync_dir(&dir)?;

        info!(
            "Opened event log at {} ({} events, {} bytes)",
            dir.display(),
            scan.last_sequence,
            scan.valid_len
        );

        Ok(FileLog {
            dir,
            events_path,
            checkpoint_dir,
            retain_checkpoints: options.retain_checkpoints.max(1),
            last_sequence: AtomicU64::new(scan.last_sequence),
            durable_len: AtomicU64::new(scan.valid_len),
            appender: Mutex::new(Appender {
                file,
                next_sequence: scan.last_sequence + 1,
                len: scan.valid_len,
                poisoned: false,
                index: scan.index,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn checkpoint_path(&self, sequence: u64) -> PathBuf {
        self.checkpoint_dir.join(format!("{CHECKPOINT_PREFIX}{sequence:020}{CHECKPOINT_SUFFIX}"))
    }

    fn prune_checkpoints(&self) -> io::Result<()> {
        let checkpoints = list_checkpoints(&self.checkpoint_dir)?;
        let excess = checkpoints.len().saturating_sub(self.retain_checkpoints);
        for (sequence, path) in checkpoints.into_iter().take(excess) {
            debug!("Pruning checkpoint {sequence}");
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl EventLog for FileLog {
    fn append(&self, payload: EventPayload) -> Result<Event, DurabilityError> {
        let mut appender = self.appender.lock();
        if appender.poisoned {
            return Err(DurabilityError::Poisoned);
        }

        let event = Event { sequence: appender.next_sequence, timestamp: Utc::now(), payload };
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let start = appender.len;
        if let Err(err) = write_record(&mut appender.file, &line) {
            let rollback = appender.file.set_len(start).and_then(|()| appender.file.sync_data());
            if let Err(rollback_err) = rollback {
                error!(
                    "Could not roll back failed append at byte {start}: {rollback_err}; log is poisoned"
                );
                appender.poisoned = true;
            }
            return Err(err.into());
        }

        if (event.sequence - 1) % INDEX_STRIDE == 0 {
            appender.index.push((event.sequence, start));
        }
        appender.len += line.len() as u64;
        appender.next_sequence += 1;
        self.durable_len.store(appender.len, Ordering::Release);
        self.last_sequence.store(event.sequence, Ordering::Release);
        Ok(event)
    }

    fn append_checkpoint(&self, state: &BeliefState, sequence: u64) -> Result<(), WalError> {
        let durable = self.last_sequence();
        if sequence > durable {
            return Err(WalError::CheckpointAhead { requested: sequence, durable });
        }
        if sequence != state.sequence() {
            return Err(WalError::CheckpointMismatch { requested: sequence, state: state.sequence() });
        }

        let path = self.checkpoint_path(sequence);
        let tmp_path = path.with_extension(format!("json{TMP_SUFFIX}"));
        {
            let mut file =
                OpenOptions::new().create(true).write(true).truncate(true).open(&tmp_path)?;
            serde_json::to_writer(&mut file, state)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        sync_dir(&self.checkpoint_dir)?;
        info!("Wrote checkpoint at sequence {sequence}");

        if let Err(e) = self.prune_checkpoints() {
            warn!("Checkpoint {sequence} written but pruning older checkpoints failed: {e}");
        }
        Ok(())
    }

    fn replay(&self, from: u64) -> Result<EventStream<'_>, WalError> {
        let (start_sequence, start_offset, end) = {
            let appender = self.appender.lock();
            let (seq, offset) = appender
                .index
                .iter()
                .rev()
                .find(|(seq, _)| *seq <= from.saturating_add(1))
                .copied()
                .unwrap_or((1, 0));
            (seq, offset, appender.len)
        };

        let mut file = File::open(&self.events_path)?;
        file.seek(SeekFrom::Start(start_offset))?;
        Ok(Box::new(Replay {
            reader: BufReader::new(file.take(end - start_offset)),
            offset: start_offset,
            expected: start_sequence,
            from,
            buf: Vec::new(),
            done: false,
        }))
    }

    fn latest_checkpoint(&self) -> Result<Option<(BeliefState, u64)>, WalError> {
        let durable = self.last_sequence();
        for (sequence, path) in list_checkpoints(&self.checkpoint_dir)?.into_iter().rev() {
            if sequence > durable {
                warn!("Skipping checkpoint {sequence}: ahead of the event log ({durable})");
                continue;
            }
            let state = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| serde_json::from_slice::<BeliefState>(&bytes).map_err(|e| e.to_string()));
            match state {
                Ok(state) if state.sequence() == sequence => return Ok(Some((state, sequence))),
                Ok(state) => warn!(
                    "Skipping checkpoint {}: holds sequence {}",
                    path.display(),
                    state.sequence()
                ),
                Err(e) => warn!("Skipping unreadable checkpoint {}: {e}", path.display()),
            }
        }
        Ok(None)
    }

    fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    fn stats(&self) -> LogStats {
        let checkpoints = list_checkpoints(&self.checkpoint_dir)
            .map(|list| list.into_iter().map(|(seq, _)| seq).collect())
            .unwrap_or_default();
        LogStats {
            events: self.last_sequence(),
            bytes: self.durable_len.load(Ordering::Acquire),
            checkpoints,
        }
    }
}

fn write_record(file: &mut File, line: &[u8]) -> io::Result<()> {
    file.write_all(line)?;
    file.sync_data()
}

fn parse_record(buf: &[u8]) -> Result<Event, String> {
    match buf.split_last() {
        Some((b'\n', body)) => serde_json::from_slice(body).map_err(|e| e.to_string()),
        _ => Err("record is missing its terminating newline".to_string()),
    }
}

fn scan_events(path: &Path) -> Result<Scan, WalError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    let mut offset = 0u64;
    let mut expected = 1u64;
    let mut index = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        match parse_record(&buf) {
            Ok(event) => {
                if event.sequence != expected {
                    return Err(WalError::SequenceGap { expected, found: event.sequence });
                }
                if (expected - 1) % INDEX_STRIDE == 0 {
                    index.push((expected, offset));
                }
                expected += 1;
                offset += n as u64;
            }
            // The last record may be a torn write; anything before it may not.
            Err(_) if reader.fill_buf()?.is_empty() => break,
            Err(reason) => return Err(WalError::Corrupt { offset, reason }),
        }
    }

    Ok(Scan { valid_len: offset, last_sequence: expected - 1, index })
}

struct Replay {
    reader: BufReader<io::Take<File>>,
    offset: u64,
    expected: u64,
    from: u64,
    buf: Vec<u8>,
    done: bool,
}

impl Replay {
    fn fail(&mut self, err: WalError) -> Option<Result<Event, WalError>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for Replay {
    type Item = Result<Event, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            let n = match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(n) => n,
                Err(e) => return self.fail(e.into()),
            };
            let at = self.offset;
            self.offset += n as u64;

            let event = match parse_record(&self.buf) {
                Ok(event) => event,
                Err(reason) => return self.fail(WalError::Corrupt { offset: at, reason }),
            };
            if event.sequence != self.expected {
                let err = WalError::SequenceGap { expected: self.expected, found: event.sequence };
                return self.fail(err);
            }
            self.expected += 1;
            if event.sequence > self.from {
                return Some(Ok(event));
            }
        }
        None
    }
}

/// Checkpoints in `dir`, oldest first.
fn list_checkpoints(dir: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    let mut checkpoints = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let sequence = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(CHECKPOINT_PREFIX))
            .and_then(|rest| rest.strip_suffix(CHECKPOINT_SUFFIX))
            .and_then(|digits| digits.parse::<u64>().ok());
        if let Some(sequence) = sequence {
            checkpoints.push((sequence, path));
        }
    }
    checkpoints.sort_by_key(|(seq, _)| *seq);
    Ok(checkpoints)
}

fn remove_stale_temp_files(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.to_str().is_some_and(|p| p.ends_with(TMP_SUFFIX)) {
            warn!("Removing incomplete checkpoint {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thurstone::ModelConfig;
    use crate::types::{Comparison, ItemId, Outcome};
    use tempfile::TempDir;

    fn id(s: &str) -> ItemId {
        ItemId::parse(s).unwrap()
    }

    fn comparison(left: &str, right: &str) -> EventPayload {
        EventPayload::Comparison(Comparison {
            left: id(left),
            right: id(right),
            outcome: Outcome::Probability(0.1 + 0.2),
            judge: "judge".into(),
        })
    }

    fn open(dir: &TempDir) -> FileLog {
        FileLog::open(dir.path(), FileLogOptions::default()).unwrap()
    }

    fn sequences(log: &FileLog, from: u64) -> Vec<u64> {
        log.replay(from).unwrap().map(|e| e.unwrap().sequence).collect()
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let log = open(&dir);
            for _ in 0..3 {
                log.append(comparison("a", "b")).unwrap();
            }
        }
        let log = open(&dir);
        assert_eq!(log.last_sequence(), 3);
        assert_eq!(log.append(comparison("b", "c")).unwrap().sequence, 4);

        let events: Vec<Event> = log.replay(0).unwrap().map(Result::unwrap).collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].payload, comparison("a", "b"));
    }

    #[test]
    fn test_replay_from_any_point_uses_index() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);
        let total = INDEX_STRIDE * 2 + 10;
        for _ in 0..total {
            log.append(comparison("a", "b")).unwrap();
        }
        for from in [0, 1, INDEX_STRIDE - 1, INDEX_STRIDE, INDEX_STRIDE + 7, total - 1, total] {
            let seqs = sequences(&log, from);
            assert_eq!(seqs, ((from + 1)..=total).collect::<Vec<_>>(), "from {from}");
        }
        // Restartable.
        assert_eq!(sequences(&log, 5), sequences(&log, 5));
    }

    #[test]
    fn test_replay_is_bounded_at_call_time() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);
        log.append(comparison("a", "b")).unwrap();
        let stream = log.replay(0).unwrap();
        log.append(comparison("a", "b")).unwrap();
        assert_eq!(stream.count(), 1);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        {
            let log = open(&dir);
            log.append(comparison("a", "b")).unwrap();
            log.append(comparison("b", "c")).unwrap();
        }
        let path = dir.path().join(EVENTS_FILE);
        let clean_len = fs::metadata(&path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"sequence":3,"timestamp":"2024-01-0"#).unwrap();
        drop(file);

        let log = open(&dir);
        assert_eq!(log.last_sequence(), 2);
        assert_eq!(fs::metadata(&path).unwrap().len(), clean_len);
        assert_eq!(log.append(comparison("c", "d")).unwrap().sequence, 3);
        assert_eq!(sequences(&log, 0), vec![1, 2, 3]);
    }

    #[test]
    fn test_mid_file_corruption_is_an_error() {
        let dir = TempDir::new().unwrap();
        {
            let log = open(&dir);
            log.append(comparison("a", "b")).unwrap();
        }
        let path = dir.path().join(EVENTS_FILE);
        let good = fs::read_to_string(&path).unwrap();
        fs::write(&path, format!("not json\n{good}")).unwrap();

        let err = FileLog::open(dir.path(), FileLogOptions::default()).err().unwrap();
        assert!(matches!(err, WalError::Corrupt { offset: 0, .. }));
    }

    #[test]
    fn test_sequence_gap_is_an_error() {
        let dir = TempDir::new().unwrap();
        {
            let log = open(&dir);
            log.append(comparison("a", "b")).unwrap();
            log.append(comparison("a", "b")).unwrap();
        }
        let path = dir.path().join(EVENTS_FILE);
        let text = fs::read_to_string(&path).unwrap();
        let second = text.lines().nth(1).unwrap();
        fs::write(&path, format!("{second}\n")).unwrap();

        let err = FileLog::open(dir.path(), FileLogOptions::default()).err().unwrap();
        assert!(matches!(err, WalError::SequenceGap { expected: 1, found: 2 }));
    }

    #[test]
    fn test_checkpoints_round_trip_and_prune() {
        let dir = TempDir::new().unwrap();
        let log = FileLog::open(dir.path(), FileLogOptions { retain_checkpoints: 2 }).unwrap();
        let mut state = BeliefState::new(ModelConfig::default());

        for _ in 0..3 {
            let event = log.append(comparison("a", "b")).unwrap();
            state.apply(&event).unwrap();
            log.append_checkpoint(&state, event.sequence).unwrap();
        }

        assert_eq!(log.stats().checkpoints, vec![2, 3]);
        let (restored, seq) = log.latest_checkpoint().unwrap().unwrap();
        assert_eq!(seq, 3);
        assert_eq!(restored, state);
    }

    #[test]
    fn test_prune_failure_keeps_new_checkpoint() {
        let dir = TempDir::new().unwrap();
        let log = FileLog::open(dir.path(), FileLogOptions { retain_checkpoints: 1 }).unwrap();
        // A directory under a checkpoint name cannot be removed with remove_file.
        fs::create_dir(log.checkpoint_path(0)).unwrap();

        let mut state = BeliefState::new(ModelConfig::default());
        let event = log.append(comparison("a", "b")).unwrap();
        state.apply(&event).unwrap();
        log.append_checkpoint(&state, 1).unwrap();

        assert!(log.checkpoint_path(1).is_file());
        let (restored, seq) = log.latest_checkpoint().unwrap().unwrap();
        assert_eq!(seq, 1);
        assert_eq!(restored, state);
    }

    #[test]
    fn test_checkpoint_must_match_durable_log() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);
        let state = BeliefState::new(ModelConfig::default());
        let err = log.append_checkpoint(&state, 1).unwrap_err();
        assert!(matches!(err, WalError::CheckpointAhead { requested: 1, durable: 0 }));

        log.append(comparison("a", "b")).unwrap();
        let err = log.append_checkpoint(&state, 1).unwrap_err();
        assert!(matches!(err, WalError::CheckpointMismatch { requested: 1, state: 0 }));
    }

    #[test]
    fn test_unreadable_checkpoint_falls_back_to_older() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);
        let mut state = BeliefState::new(ModelConfig::default());
        let event = log.append(comparison("a", "b")).unwrap();
        state.apply(&event).unwrap();
        log.append_checkpoint(&state, 1).unwrap();
        log.append(comparison("a", "b")).unwrap();

        fs::write(log.checkpoint_path(2), b"{ garbage").unwrap();
        let (restored, seq) = log.latest_checkpoint().unwrap().unwrap();
        assert_eq!(seq, 1);
        assert_eq!(restored, state);
    }

    #[test]
    fn test_stale_temp_checkpoint_removed_on_open() {
        let dir = TempDir::new().unwrap();
        drop(open(&dir));
        let stale = dir.path().join(CHECKPOINT_DIR).join("checkpoint-00000000000000000009.json.tmp");
        fs::write(&stale, b"{").unwrap();
        let log = open(&dir);
        assert!(!stale.exists());
        assert!(log.latest_checkpoint().unwrap().is_none());
    }
}
