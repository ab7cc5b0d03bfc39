//! Binary execution tracing.
//!
//! When a trace path is configured, the runtime appends fixed-layout records
//! to a binary file (all integers little-endian):
//!
//! ```text
//! Header: start_time (i64), table_size N (i32),
//!         then N entries of { pointer (u64), NUL-terminated ASCII description }.
//! Body:   frames of { length (i32), then `length` records }.
//! record: { event_type: i32, pointer: u64, src_id: i32, dst_id: i32,
//!           logical_time: i64, microstep: u32, physical_time: i64,
//!           trigger: u64, extra_delay: i64 }
//! ```
//!
//! The object table maps synthetic pointers (arena indices) to component
//! descriptions, so offline tooling can name reactions and triggers.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use cadence_core::Tag;

/// Records buffered before a frame is written out.
const FRAME_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TraceEvent {
    ReactionStarts = 0,
    ReactionEnds = 1,
    ReactionDeadlineMissed = 2,
    ScheduleCalled = 3,
    UserEvent = 4,
    UserValue = 5,
    WorkerWaitStarts = 6,
    WorkerWaitEnds = 7,
    SchedulerAdvancingTimeStarts = 8,
    SchedulerAdvancingTimeEnds = 9,
    FederatedSend = 10,
    FederatedReceive = 11,
}

#[derive(Debug, Clone, Copy)]
pub struct TraceRecord {
    pub event_type: TraceEvent,
    pub pointer: u64,
    pub src_id: i32,
    pub dst_id: i32,
    pub logical_time: i64,
    pub microstep: u32,
    pub physical_time: i64,
    pub trigger: u64,
    pub extra_delay: i64,
}

impl TraceRecord {
    fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&(self.event_type as i32).to_le_bytes())?;
        out.write_all(&self.pointer.to_le_bytes())?;
        out.write_all(&self.src_id.to_le_bytes())?;
        out.write_all(&self.dst_id.to_le_bytes())?;
        out.write_all(&self.logical_time.to_le_bytes())?;
        out.write_all(&self.microstep.to_le_bytes())?;
        out.write_all(&self.physical_time.to_le_bytes())?;
        out.write_all(&self.trigger.to_le_bytes())?;
        out.write_all(&self.extra_delay.to_le_bytes())?;
        Ok(())
    }
}

/// Buffered writer for the binary trace format.
pub struct TraceWriter {
    out: BufWriter<File>,
    buffer: Vec<TraceRecord>,
    started: bool,
    table: Vec<(u64, String)>,
}

impl std::fmt::Debug for TraceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceWriter")
            .field("started", &self.started)
            .field("table_len", &self.table.len())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl TraceWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            buffer: Vec::with_capacity(FRAME_CAPACITY),
            started: false,
            table: Vec::new(),
        })
    }

    /// Register an object description before the header is written.
    pub fn register(&mut self, pointer: u64, description: &str) {
        debug_assert!(!self.started, "object table is closed once tracing starts");
        self.table.push((pointer, description.to_string()));
    }

    /// Write the header and open the body.
    pub fn start(&mut self, start_time: i64) -> io::Result<()> {
        self.out.write_all(&start_time.to_le_bytes())?;
        self.out
            .write_all(&(i32::try_from(self.table.len()).unwrap_or(i32::MAX)).to_le_bytes())?;
        for (pointer, description) in &self.table {
            self.out.write_all(&pointer.to_le_bytes())?;
            self.out.write_all(description.as_bytes())?;
            self.out.write_all(&[0])?;
        }
        self.started = true;
        Ok(())
    }

    pub fn record(&mut self, record: TraceRecord) -> io::Result<()> {
        debug_assert!(self.started, "trace record before header");
        self.buffer.push(record);
        if self.buffer.len() >= FRAME_CAPACITY {
            self.flush_frame()?;
        }
        Ok(())
    }

    fn flush_frame(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.out
            .write_all(&(i32::try_from(self.buffer.len()).unwrap_or(i32::MAX)).to_le_bytes())?;
        for record in self.buffer.drain(..) {
            record.write_to(&mut self.out)?;
        }
        Ok(())
    }

    /// Flush any partial frame and the underlying writer.
    pub fn finish(&mut self) -> io::Result<()> {
        self.flush_frame()?;
        self.out.flush()
    }
}

/// Hook facade used throughout the scheduler: no-ops when tracing is off.
#[derive(Debug, Default)]
pub(crate) struct Tracer {
    writer: Option<Mutex<TraceWriter>>,
}

impl Tracer {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(writer: TraceWriter) -> Self {
        Self {
            writer: Some(Mutex::new(writer)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Register an object description; only valid before `start`.
    pub fn register(&self, pointer: u64, description: &str) {
        if let Some(writer) = &self.writer {
            writer.lock().unwrap().register(pointer, description);
        }
    }

    pub fn start(&self, start_time: i64) {
        if let Some(writer) = &self.writer {
            if let Err(error) = writer.lock().unwrap().start(start_time) {
                tracing::error!(%error, "failed to write trace header");
            }
        }
    }

    pub fn emit(&self, record: TraceRecord) {
        if let Some(writer) = &self.writer {
            if let Err(error) = writer.lock().unwrap().record(record) {
                tracing::error!(%error, "failed to append trace record");
            }
        }
    }

    pub fn finish(&self) {
        if let Some(writer) = &self.writer {
            if let Err(error) = writer.lock().unwrap().finish() {
                tracing::error!(%error, "failed to flush trace file");
            }
        }
    }

    /// Emit a point event carrying no payload value.
    pub fn event(
        &self,
        event_type: TraceEvent,
        pointer: u64,
        src_id: i32,
        dst_id: i32,
        tag: Tag,
        physical_time: i64,
    ) {
        if self.writer.is_some() {
            self.emit(TraceRecord {
                event_type,
                pointer,
                src_id,
                dst_id,
                logical_time: tag.time(),
                microstep: tag.microstep(),
                physical_time,
                trigger: 0,
                extra_delay: 0,
            });
        }
    }

    pub fn schedule_called(
        &self,
        trigger: u64,
        tag: Tag,
        physical_time: i64,
        extra_delay: i64,
    ) {
        if self.writer.is_some() {
            self.emit(TraceRecord {
                event_type: TraceEvent::ScheduleCalled,
                pointer: trigger,
                src_id: -1,
                dst_id: -1,
                logical_time: tag.time(),
                microstep: tag.microstep(),
                physical_time,
                trigger,
                extra_delay,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_i32(bytes: &[u8], at: &mut usize) -> i32 {
        let v = i32::from_le_bytes(bytes[*at..*at + 4].try_into().unwrap());
        *at += 4;
        v
    }

    fn read_i64(bytes: &[u8], at: &mut usize) -> i64 {
        let v = i64::from_le_bytes(bytes[*at..*at + 8].try_into().unwrap());
        *at += 8;
        v
    }

    fn read_u64(bytes: &[u8], at: &mut usize) -> u64 {
        let v = u64::from_le_bytes(bytes[*at..*at + 8].try_into().unwrap());
        *at += 8;
        v
    }

    #[test]
    fn test_header_and_frame_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.trace");

        let mut writer = TraceWriter::create(&path).unwrap();
        writer.register(0, "reaction main/r0");
        writer.register(1, "trigger main/t0");
        writer.start(42).unwrap();
        writer
            .record(TraceRecord {
                event_type: TraceEvent::ReactionStarts,
                pointer: 0,
                src_id: 3,
                dst_id: 0,
                logical_time: 1_000,
                microstep: 2,
                physical_time: 1_500,
                trigger: 1,
                extra_delay: 0,
            })
            .unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let mut at = 0;

        assert_eq!(read_i64(&bytes, &mut at), 42);
        assert_eq!(read_i32(&bytes, &mut at), 2);

        for expected in ["reaction main/r0", "trigger main/t0"] {
            let _pointer = read_u64(&bytes, &mut at);
            let nul = bytes[at..].iter().position(|&b| b == 0).unwrap();
            assert_eq!(&bytes[at..at + nul], expected.as_bytes());
            at += nul + 1;
        }

        // One frame with one record.
        assert_eq!(read_i32(&bytes, &mut at), 1);
        assert_eq!(read_i32(&bytes, &mut at), TraceEvent::ReactionStarts as i32);
        assert_eq!(read_u64(&bytes, &mut at), 0);
        assert_eq!(read_i32(&bytes, &mut at), 3);
        assert_eq!(read_i32(&bytes, &mut at), 0);
        assert_eq!(read_i64(&bytes, &mut at), 1_000);
        assert_eq!(
            u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()),
            2
        );
        at += 4;
        assert_eq!(read_i64(&bytes, &mut at), 1_500);
        assert_eq!(read_u64(&bytes, &mut at), 1);
        assert_eq!(read_i64(&bytes, &mut at), 0);
        assert_eq!(at, bytes.len());
    }

    #[test]
    fn test_disabled_tracer_is_noop() {
        let tracer = Tracer::disabled();
        assert!(!tracer.is_enabled());
        tracer.start(0);
        tracer.event(TraceEvent::UserEvent, 0, 0, 0, Tag::ZERO, 0);
        tracer.finish();
    }
}
