//! Event sources and score sinks
//!
//! The scoring core never performs I/O itself. Batches come in through an
//! [`EventSource`] and finished records leave through a [`ScoreSink`]; both are
//! implemented here for in-memory use and for byte streams.

use crate::error::ComputeError;
use crate::schema::{RawEventAdapter, RawEventRecord};
use crate::types::ScoreRecord;
use std::io::{BufRead, Write};

/// Supplies batches of raw event records
pub trait EventSource {
    /// Fetch the next batch; an empty batch means the source is drained
    fn fetch_batch(&mut self) -> Result<Vec<RawEventRecord>, ComputeError>;
}

/// Persists score records
pub trait ScoreSink {
    /// Write records; each record is independent of the others
    fn write_records(&mut self, records: &[ScoreRecord]) -> Result<(), ComputeError>;
}

/// Source serving a single pre-built batch
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    batch: Option<Vec<RawEventRecord>>,
}

impl MemorySource {
    pub fn new(records: Vec<RawEventRecord>) -> Self {
        Self {
            batch: Some(records),
        }
    }
}

impl EventSource for MemorySource {
    fn fetch_batch(&mut self) -> Result<Vec<RawEventRecord>, ComputeError> {
        Ok(self.batch.take().unwrap_or_default())
    }
}

/// Source reading NDJSON records from a buffered reader.
///
/// Each fetch reads up to `batch_size` records (all remaining records when
/// unset). Blank lines are skipped.
pub struct NdjsonSource<R: BufRead> {
    reader: R,
    batch_size: Option<usize>,
    line_num: usize,
}

impl<R: BufRead> NdjsonSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            batch_size: None,
            line_num: 0,
        }
    }

    /// Limit the number of records returned per fetch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size.max(1));
        self
    }
}

impl<R: BufRead> EventSource for NdjsonSource<R> {
    fn fetch_batch(&mut self) -> Result<Vec<RawEventRecord>, ComputeError> {
        let mut records = Vec::new();
        let mut line = String::new();

        while self.batch_size.map_or(true, |max| records.len() < max) {
            line.clear();
            let read = self.reader.read_line(&mut line).map_err(|e| {
                ComputeError::SourceFetch(format!(
                    "Failed to read line {}: {}",
                    self.line_num + 1,
                    e
                ))
            })?;
            if read == 0 {
                break;
            }
            self.line_num += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            records.push(RawEventAdapter::parse_line(trimmed, self.line_num)?);
        }

        Ok(records)
    }
}

/// Sink collecting records in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Vec<ScoreRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ScoreRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ScoreRecord> {
        self.records
    }
}

impl ScoreSink for MemorySink {
    fn write_records(&mut self, records: &[ScoreRecord]) -> Result<(), ComputeError> {
        self.records.extend_from_slice(records);
        Ok(())
    }
}

/// Sink writing one JSON object per line
pub struct NdjsonSink<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ScoreSink for NdjsonSink<W> {
    fn write_records(&mut self, records: &[ScoreRecord]) -> Result<(), ComputeError> {
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(self.writer, "{}", line).map_err(sink_error)?;
        }
        self.writer.flush().map_err(sink_error)
    }
}

/// Sink writing all records of a call as one JSON array
pub struct JsonSink<W: Write> {
    writer: W,
    pretty: bool,
}

impl<W: Write> JsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pretty: false,
        }
    }

    pub fn pretty(writer: W) -> Self {
        Self {
            writer,
            pretty: true,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ScoreSink for JsonSink<W> {
    fn write_records(&mut self, records: &[ScoreRecord]) -> Result<(), ComputeError> {
        let json = if self.pretty {
            serde_json::to_string_pretty(records)?
        } else {
            serde_json::to_string(records)?
        };
        writeln!(self.writer, "{}", json).map_err(sink_error)?;
        self.writer.flush().map_err(sink_error)
    }
}

/// Sink writing line-protocol points for the time-series store
pub struct LineProtocolSink<W: Write> {
    writer: W,
}

impl<W: Write> LineProtocolSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ScoreSink for LineProtocolSink<W> {
    fn write_records(&mut self, records: &[ScoreRecord]) -> Result<(), ComputeError> {
        for record in records {
            writeln!(self.writer, "{}", record.to_line_protocol()).map_err(sink_error)?;
        }
        self.writer.flush().map_err(sink_error)
    }
}

fn sink_error(e: std::io::Error) -> ComputeError {
    ComputeError::SinkWrite(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::io::{self, Cursor};

    const NDJSON: &str = "\
{\"timestamp\":\"2024-01-15T14:00:00Z\",\"source_url\":\"https://a.com/p\",\"session_id\":\"s1\",\"api_key\":\"k\",\"y_position\":0,\"bottom_of_viewport\":800}

{\"timestamp\":\"2024-01-15T14:00:02Z\",\"source_url\":\"https://a.com/p\",\"session_id\":\"s1\",\"api_key\":\"k\",\"y_position\":10,\"bottom_of_viewport\":800}
{\"timestamp\":\"2024-01-15T14:00:04Z\",\"source_url\":\"https://a.com/p\",\"session_id\":\"s1\",\"api_key\":\"k\",\"y_position\":20,\"bottom_of_viewport\":800}
";

    fn make_record(id: &str) -> ScoreRecord {
        ScoreRecord {
            id: id.to_string(),
            source_url: "https://a.com/p".to_string(),
            session_id: "s1".to_string(),
            api_key: "k".to_string(),
            reached_end_of_content: false,
            total_in_viewport_seconds: 4.0,
            word_count: 270.0,
            score: 42.5,
            written_at: Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap(),
        }
    }

    struct BrokenReader;

    impl io::Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "store went away"))
        }
    }

    struct BrokenWriter;

    impl io::Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_memory_source_drains() {
        let mut source = MemorySource::new(RawEventAdapter::parse_ndjson(NDJSON).unwrap());
        assert_eq!(source.fetch_batch().unwrap().len(), 3);
        assert!(source.fetch_batch().unwrap().is_empty());
    }

    #[test]
    fn test_ndjson_source_reads_all() {
        let mut source = NdjsonSource::new(Cursor::new(NDJSON));
        assert_eq!(source.fetch_batch().unwrap().len(), 3);
        assert!(source.fetch_batch().unwrap().is_empty());
    }

    #[test]
    fn test_ndjson_source_batches() {
        let mut source = NdjsonSource::new(Cursor::new(NDJSON)).with_batch_size(2);
        assert_eq!(source.fetch_batch().unwrap().len(), 2);
        assert_eq!(source.fetch_batch().unwrap().len(), 1);
        assert!(source.fetch_batch().unwrap().is_empty());
    }

    #[test]
    fn test_ndjson_source_reports_line_number() {
        let input = format!("{}\nnot json\n", NDJSON.lines().next().unwrap());
        let err = NdjsonSource::new(Cursor::new(input)).fetch_batch().unwrap_err();
        match err {
            ComputeError::ParseError(msg) => assert!(msg.contains("line 2")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ndjson_source_keeps_valid_json_that_is_not_an_event() {
        let input = format!("[1,2]\n{}\n", NDJSON.lines().next().unwrap());
        let records = NdjsonSource::new(Cursor::new(input)).fetch_batch().unwrap();

        assert_eq!(records.len(), 2);
        assert!(records[0].validate().is_err());
        assert!(records[1].validate().is_ok());
    }

    #[test]
    fn test_ndjson_source_read_failure() {
        let mut source = NdjsonSource::new(io::BufReader::new(BrokenReader));
        assert!(matches!(
            source.fetch_batch(),
            Err(ComputeError::SourceFetch(_))
        ));
    }

    #[test]
    fn test_memory_sink_appends() {
        let mut sink = MemorySink::new();
        sink.write_records(&[make_record("a")]).unwrap();
        sink.write_records(&[make_record("b")]).unwrap();

        let ids: Vec<&str> = sink.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_ndjson_sink() {
        let mut sink = NdjsonSink::new(Vec::new());
        sink.write_records(&[make_record("a"), make_record("b")]).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: ScoreRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, make_record("b"));
    }

    #[test]
    fn test_json_sink() {
        let mut sink = JsonSink::pretty(Vec::new());
        sink.write_records(&[make_record("a")]).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let parsed: Vec<ScoreRecord> = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed, vec![make_record("a")]);
    }

    #[test]
    fn test_json_sink_writes_empty_array() {
        let mut sink = JsonSink::new(Vec::new());
        sink.write_records(&[]).unwrap();
        assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), "[]\n");
    }

    #[test]
    fn test_line_protocol_sink() {
        let mut sink = LineProtocolSink::new(Vec::new());
        sink.write_records(&[make_record("a")]).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            output,
            "event_scores,api_key=k,source_url=https://a.com/p,uuid=a \
             reached_end_of_content=false,score=42.5,total_in_viewport_time=4,word_count=270 1705330800\n"
        );
    }

    #[test]
    fn test_sink_write_failure() {
        let mut sink = LineProtocolSink::new(BrokenWriter);
        assert!(matches!(
            sink.write_records(&[make_record("a")]),
            Err(ComputeError::SinkWrite(_))
        ));
    }
}
