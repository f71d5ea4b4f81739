//! Corpus files: newline-delimited JSON (one event per line) or one JSON array.
//!
//! Both encodings carry the same records and decode to the same `Vec<Event>`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::{CorpusError, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusFormat {
    Ndjson,
    JsonArray,
}

impl CorpusFormat {
    pub fn parse(s: &str) -> Result<Self, CorpusError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            "json" | "array" => Ok(Self::JsonArray),
            other => Err(CorpusError::UnknownFormat(other.to_string())),
        }
    }

    /// Guess from the file extension; anything but `.json` is NDJSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::JsonArray,
            _ => Self::Ndjson,
        }
    }
}

pub fn write_ndjson_to<W: Write>(writer: W, events: &[Event]) -> Result<(), CorpusError> {
    let mut writer = BufWriter::new(writer);
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_ndjson_from<R: Read>(reader: R) -> Result<Vec<Event>, CorpusError> {
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|source| CorpusError::Line {
            line: idx + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

pub fn write_json_array_to<W: Write>(writer: W, events: &[Event]) -> Result<(), CorpusError> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, events)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn read_json_array_from<R: Read>(reader: R) -> Result<Vec<Event>, CorpusError> {
    Ok(serde_json::from_reader(BufReader::new(reader))?)
}

pub fn write_ndjson(path: &Path, events: &[Event]) -> Result<(), CorpusError> {
    write_ndjson_to(File::create(path)?, events)
}

pub fn read_ndjson(path: &Path) -> Result<Vec<Event>, CorpusError> {
    read_ndjson_from(File::open(path)?)
}

pub fn write_json_array(path: &Path, events: &[Event]) -> Result<(), CorpusError> {
    write_json_array_to(File::create(path)?, events)
}

pub fn read_json_array(path: &Path) -> Result<Vec<Event>, CorpusError> {
    read_json_array_from(File::open(path)?)
}

pub fn write_corpus(path: &Path, events: &[Event], format: CorpusFormat) -> Result<(), CorpusError> {
    match format {
        CorpusFormat::Ndjson => write_ndjson(path, events),
        CorpusFormat::JsonArray => write_json_array(path, events),
    }
}

/// Read either encoding; a leading `[` selects the array form.
pub fn read_corpus(path: &Path) -> Result<Vec<Event>, CorpusError> {
    let bytes = std::fs::read(path)?;
    let first = bytes.iter().find(|b| !b.is_ascii_whitespace());
    match first {
        Some(b'[') => read_json_array_from(bytes.as_slice()),
        _ => read_ndjson_from(bytes.as_slice()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{EventPayload, PageViewProps};
    use crate::EventId;
    use chrono::{TimeZone, Utc};

    fn sample() -> Vec<Event> {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        vec![
            Event::new(
                EventId::new("a"),
                "user_1",
                ts,
                EventPayload::PageView(PageViewProps {
                    page: Some("/home".to_string()),
                    session_duration: Some(42),
                    ..Default::default()
                }),
            ),
            Event::new(
                EventId::new("b"),
                "user_2",
                ts,
                EventPayload::empty(crate::EventKind::Logout),
            )
            .with_site_url("https://shop.example.org"),
        ]
    }

    #[test]
    fn ndjson_is_one_object_per_line() {
        let mut buf = Vec::new();
        write_ndjson_to(&mut buf, &sample()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l.starts_with('{')));
    }

    #[test]
    fn ndjson_errors_name_the_line() {
        let input = "{\"event_id\":\"a\",\"user_id\":\"u\",\"event_name\":\"logout\",\"timestamp\":\"2024-01-01T00:00:00Z\"}\n\nnot json\n";
        let err = read_ndjson_from(input.as_bytes()).unwrap_err();
        match err {
            CorpusError::Line { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn read_corpus_detects_array_form() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.data");
        write_json_array(&path, &sample()).unwrap();
        assert_eq!(read_corpus(&path).unwrap(), sample());

        write_ndjson(&path, &sample()).unwrap();
        assert_eq!(read_corpus(&path).unwrap(), sample());
    }

    #[test]
    fn format_names() {
        assert_eq!(CorpusFormat::parse("NDJSON").unwrap(), CorpusFormat::Ndjson);
        assert_eq!(CorpusFormat::parse("json").unwrap(), CorpusFormat::JsonArray);
        assert!(CorpusFormat::parse("csv").is_err());
        assert_eq!(
            CorpusFormat::from_path(Path::new("out/events.json")),
            CorpusFormat::JsonArray
        );
    }
}
