//! JSON Lines trace persistence.
//!
//! The on-disk format is one JSON object per line: the first line carries
//! the trace metadata as `{"trace": {...}}` with an empty span list, and
//! each following line carries one span as `{"span": {...}}` in execution
//! order. Reading reassembles the spans onto the trace.

use crate::span::ExecutionSpan;
use crate::trace::ExecutionTrace;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use thiserror::Error;

/// Failures while writing or reading a trace stream
#[derive(Debug, Error)]
pub enum ExportError {
    /// Underlying I/O failure
    #[error("trace i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// A line did not parse as the expected record
    #[error("malformed trace record at line {line}: {source}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// Parse error
        source: serde_json::Error,
    },

    /// The stream did not start with a trace record
    #[error("missing trace header record")]
    MissingHeader,

    /// A span record appeared with no preceding trace record
    #[error("span record at line {line} outside a trace")]
    OrphanSpan {
        /// 1-based line number
        line: usize,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Record {
    Trace(ExecutionTrace),
    Span(ExecutionSpan),
}

/// Write a trace as JSON Lines.
///
/// # Errors
///
/// Returns [`ExportError::Io`] on write failure.
pub fn write_trace<W: Write>(mut writer: W, trace: &ExecutionTrace) -> Result<(), ExportError> {
    let mut header = trace.clone();
    let spans = std::mem::take(&mut header.spans);

    serde_json::to_writer(&mut writer, &Record::Trace(header))
        .map_err(|e| ExportError::Io(e.into()))?;
    writer.write_all(b"\n")?;

    for span in spans {
        serde_json::to_writer(&mut writer, &Record::Span(span))
            .map_err(|e| ExportError::Io(e.into()))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a trace back from JSON Lines.
///
/// # Errors
///
/// Returns [`ExportError::MissingHeader`] for an empty or headerless
/// stream, [`ExportError::Malformed`] for unparseable lines, and
/// [`ExportError::OrphanSpan`] for spans preceding the header.
pub fn read_trace<R: BufRead>(reader: R) -> Result<ExecutionTrace, ExportError> {
    let mut trace: Option<ExecutionTrace> = None;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line).map_err(|source| {
            ExportError::Malformed {
                line: index + 1,
                source,
            }
        })?;
        match record {
            Record::Trace(header) => {
                if trace.is_none() {
                    trace = Some(header);
                }
            }
            Record::Span(span) => match trace.as_mut() {
                Some(trace) => trace.record(span),
                None => return Err(ExportError::OrphanSpan { line: index + 1 }),
            },
        }
    }

    trace.ok_or(ExportError::MissingHeader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{SpanBuilder, SpanOutcome};
    use arbiter_core::{Arguments, TraceId};
    use serde_json::json;
    use std::io::{BufReader, Cursor};

    fn sample_trace() -> ExecutionTrace {
        let trace_id = TraceId::new();
        let mut trace = ExecutionTrace::new(trace_id, Vec::new()).with_tag("export-test");
        let mut args = Arguments::new();
        args.insert("url".to_string(), json!("https://example.test"));

        let mut builder = SpanBuilder::new(trace_id, "c1", "fetch", args);
        builder.mark_started();
        builder.set_result(json!({"status": 200}));
        trace.record(builder.seal(SpanOutcome::Success));

        trace.record(
            SpanBuilder::new(trace_id, "c2", "store", Arguments::new())
                .seal(SpanOutcome::Blocked),
        );
        trace.seal();
        trace
    }

    #[test]
    fn test_round_trip_through_buffer() {
        let trace = sample_trace();
        let mut buf = Vec::new();
        write_trace(&mut buf, &trace).unwrap();

        let back = read_trace(Cursor::new(buf)).unwrap();
        assert_eq!(back, trace);
    }

    #[test]
    fn test_format_shape() {
        let trace = sample_trace();
        let mut buf = Vec::new();
        write_trace(&mut buf, &trace).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);

        let header: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert!(header.get("trace").is_some());
        // header carries no spans; they follow one per line
        assert_eq!(header["trace"]["spans"], json!([]));
        for line in &lines[1..] {
            let record: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(record.get("span").is_some());
        }
    }

    #[test]
    fn test_round_trip_through_file() {
        let trace = sample_trace();
        let file = tempfile::NamedTempFile::new().unwrap();
        write_trace(file.reopen().unwrap(), &trace).unwrap();

        let back = read_trace(BufReader::new(file.reopen().unwrap())).unwrap();
        assert_eq!(back.trace_id, trace.trace_id);
        assert_eq!(back.span_count(), 2);
        assert_eq!(back.content_hash(), trace.content_hash());
    }

    #[test]
    fn test_empty_stream_is_missing_header() {
        let err = read_trace(Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, ExportError::MissingHeader));
    }

    #[test]
    fn test_orphan_span_rejected() {
        let trace = sample_trace();
        let span_line = serde_json::to_string(&Record::Span(trace.spans[0].clone())).unwrap();
        let err = read_trace(Cursor::new(span_line.into_bytes())).unwrap_err();
        assert!(matches!(err, ExportError::OrphanSpan { line: 1 }));
    }

    #[test]
    fn test_malformed_line_reported_with_number() {
        let trace = sample_trace();
        let mut buf = Vec::new();
        write_trace(&mut buf, &trace).unwrap();
        buf.extend_from_slice(b"{not json\n");

        let err = read_trace(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, ExportError::Malformed { line: 4, .. }));
    }

    #[test]
    fn test_blank_lines_ignored() {
        let trace = sample_trace();
        let mut buf = Vec::new();
        write_trace(&mut buf, &trace).unwrap();
        buf.extend_from_slice(b"\n\n");

        let back = read_trace(Cursor::new(buf)).unwrap();
        assert_eq!(back.span_count(), 2);
    }
}
