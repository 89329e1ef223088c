use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tokio::sync::{mpsc, oneshot};

use super::{AuditEvent, AuditKind, AuditSink, Severity};

/// Writes events to the tracing log. HIGH severity events go out as warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let detail = serde_json::Value::Object(event.detail);
        match event.severity {
            Severity::High => tracing::warn!(
                kind = %event.kind,
                subject = %event.subject_id,
                %detail,
                "High risk audit event"
            ),
            _ => tracing::info!(
                kind = %event.kind,
                subject = %event.subject_id,
                severity = ?event.severity,
                %detail,
                "Audit event"
            ),
        }
    }
}

/// Bounded in-memory log keeping the most recent events.
#[derive(Debug)]
pub struct MemoryAuditSink {
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn of_kind(&self, kind: AuditKind) -> Vec<AuditEvent> {
        self.lock().iter().filter(|e| e.kind == kind).cloned().collect()
    }

    pub fn count(&self, kind: AuditKind) -> usize {
        self.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn at_least(&self, severity: Severity) -> Vec<AuditEvent> {
        self.lock().iter().filter(|e| e.severity >= severity).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut events = self.lock();
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }
}

enum WriterMessage {
    Line(String),
    Flush(oneshot::Sender<()>),
}

/// Appends one JSON object per line from a dedicated writer thread, so
/// `record` never touches the disk. Write failures are logged, never raised.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    tx: mpsc::UnboundedSender<WriterMessage>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let writer_path = path.clone();
        if let Err(e) = thread::Builder::new()
            .name("supface-audit".into())
            .spawn(move || write_lines(&writer_path, rx))
        {
            tracing::error!("Failed to start audit writer for {}: {}", path.display(), e);
        }
        Self { path, tx }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves once every event recorded so far has been written.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(WriterMessage::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: AuditEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize audit event {}: {}", event.kind, e);
                return;
            }
        };
        if self.tx.send(WriterMessage::Line(line)).is_err() {
            tracing::warn!("Audit writer for {} is gone, dropping {}", self.path.display(), event.kind);
        }
    }
}

fn write_lines(path: &Path, mut rx: mpsc::UnboundedReceiver<WriterMessage>) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            WriterMessage::Line(line) => {
                if let Err(e) = append_line(path, &line) {
                    tracing::warn!("Failed to persist audit event to {}: {}", path.display(), e);
                }
            }
            WriterMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}

/// Hands every event to each inner sink.
#[derive(Default, Clone)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: AuditKind, severity: Severity) -> AuditEvent {
        AuditEvent::new(kind, "user-1", severity)
    }

    #[test]
    fn memory_sink_drops_oldest_beyond_capacity() {
        let sink = MemoryAuditSink::new(2);
        sink.record(event(AuditKind::AuthFailed, Severity::Medium));
        sink.record(event(AuditKind::AuthError, Severity::High));
        sink.record(event(AuditKind::AuthSuccess, Severity::Low));

        let kinds: Vec<_> = sink.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![AuditKind::AuthError, AuditKind::AuthSuccess]);
        assert_eq!(sink.at_least(Severity::Medium).len(), 1);
    }

    #[tokio::test]
    async fn jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("nested").join("audit.jsonl"));
        sink.record(event(AuditKind::EnrollmentSuccess, Severity::Low));
        sink.record(event(AuditKind::EnrollmentSkipped, Severity::Medium));
        sink.flush().await;

        let contents = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<AuditEvent> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].kind, AuditKind::EnrollmentSkipped);
    }

    #[tokio::test]
    async fn jsonl_sink_swallows_write_errors() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes every append fail.
        let sink = JsonlAuditSink::new(dir.path());
        sink.record(event(AuditKind::AuthError, Severity::High));
        sink.flush().await;
        sink.record(event(AuditKind::AuthError, Severity::High));
        sink.flush().await;
    }

    #[test]
    fn jsonl_record_does_not_wait_for_the_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlAuditSink::new(&path);

        // Recording from outside any runtime only queues the line.
        for _ in 0..100 {
            sink.record(event(AuditKind::AuthFailed, Severity::Medium));
        }
        drop(sink);

        // Dropping the sink closes the channel; the writer drains and exits.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let written = fs::read_to_string(&path).map(|c| c.lines().count()).unwrap_or(0);
            if written == 100 {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "only {written} lines written");
            thread::sleep(std::time::Duration::from_millis(10));
        }
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(MemoryAuditSink::default());
        let b = Arc::new(MemoryAuditSink::default());
        let fanout = FanoutAuditSink::new().with(a.clone()).with(b.clone());
        fanout.record(event(AuditKind::DeletionSuccess, Severity::Low));
        assert_eq!(a.len(), 1);
        assert_eq!(b.count(AuditKind::DeletionSuccess), 1);
    }
}
