use std::fs;
use std::io::BufRead;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use floodcam_transport::adapter::{InMemoryAdapter, TransportMessage};
use serde::Deserialize;
use thiserror::Error;

/// One captured message: `{"topic": "...", "payload_b64": "..."}`.
#[derive(Debug, Deserialize)]
struct CaptureLine {
    topic: String,
    payload_b64: String,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read capture: {0}")]
    Read(#[from] std::io::Error),
    #[error("line {line}: invalid capture record: {source}")]
    Record {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: invalid base64 payload: {source}")]
    Payload {
        line: usize,
        #[source]
        source: base64::DecodeError,
    },
}

/// Parses one capture line. Blank lines and `#` comments yield `None`.
pub fn parse_capture_line(
    line_no: usize,
    raw: &str,
) -> Result<Option<TransportMessage>, ReplayError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let record: CaptureLine =
        serde_json::from_str(trimmed).map_err(|source| ReplayError::Record {
            line: line_no,
            source,
        })?;
    let payload = STANDARD
        .decode(record.payload_b64.trim())
        .map_err(|source| ReplayError::Payload {
            line: line_no,
            source,
        })?;
    Ok(Some(TransportMessage::new(record.topic, payload)))
}

/// Reads every record from `reader` into `adapter` as inbound messages.
pub fn load_capture<R: BufRead>(
    reader: R,
    adapter: &mut InMemoryAdapter,
) -> Result<usize, ReplayError> {
    let mut loaded = 0;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if let Some(message) = parse_capture_line(idx + 1, &line)? {
            adapter.enqueue_inbound(message.topic, message.payload);
            loaded += 1;
        }
    }
    Ok(loaded)
}

/// Loads a capture file into a fresh adapter.
pub fn load_capture_file(path: &Path) -> Result<InMemoryAdapter, ReplayError> {
    let file = fs::File::open(path)?;
    let mut adapter = InMemoryAdapter::default();
    load_capture(std::io::BufReader::new(file), &mut adapter)?;
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use floodcam_transport::adapter::{InMemoryAdapter, TransportAdapter};

    use super::{load_capture, parse_capture_line, ReplayError};

    #[test]
    fn loads_records_and_skips_comments() {
        let capture = "\
# captured 2024-05-01
{\"topic\":\"enchentes/imagem/dados/atual/1/0/3\",\"payload_b64\":\"AQID\"}

{\"topic\":\"esp32cam/image\",\"payload_b64\":\"e30=\"}
";
        let mut adapter = InMemoryAdapter::default();
        let loaded =
            load_capture(Cursor::new(capture), &mut adapter).expect("capture should load");
        assert_eq!(loaded, 2);

        adapter.subscribe("#").expect("valid pattern");
        let first = adapter.recv().expect("first record");
        assert_eq!(first.topic, "enchentes/imagem/dados/atual/1/0/3");
        assert_eq!(first.payload, vec![1, 2, 3]);
        let second = adapter.recv().expect("second record");
        assert_eq!(second.payload, b"{}".to_vec());
    }

    #[test]
    fn bad_records_report_line_numbers() {
        let err = parse_capture_line(7, "{\"topic\":\"t\"}").expect_err("should fail");
        assert!(matches!(err, ReplayError::Record { line: 7, .. }));

        let err = parse_capture_line(9, "{\"topic\":\"t\",\"payload_b64\":\"@@\"}")
            .expect_err("should fail");
        assert!(matches!(err, ReplayError::Payload { line: 9, .. }));
        assert!(err.to_string().starts_with("line 9: invalid base64 payload"));
    }
}
