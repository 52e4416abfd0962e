//! Dump journal command implementation.

use super::CommandResult;
use clap::ValueEnum;
use fieldsync_core::{ACTIONS_JOURNAL, DEAD_LETTER_JOURNAL};
use fieldsync_journal::{decode_record, FileBackend, Frame, Journal};
use serde::Serialize;
use std::path::Path;

/// Which journal to dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JournalName {
    /// The action store journal
    Actions,
    /// The dead-letter journal
    DeadLetters,
}

impl JournalName {
    fn file_name(self) -> &'static str {
        match self {
            JournalName::Actions => ACTIONS_JOURNAL,
            JournalName::DeadLetters => DEAD_LETTER_JOURNAL,
        }
    }
}

/// Journal record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Offset of the frame in the journal file.
    pub offset: u64,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// Record variant, when the record is a tagged map.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    /// Decoded record.
    pub record: serde_json::Value,
}

/// Runs the dump-journal command.
pub fn run(
    path: &Path,
    journal: JournalName,
    limit: Option<usize>,
    format: &str,
) -> CommandResult<()> {
    let records = read_records(path, journal, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(journal, &records);
        }
    }
    Ok(())
}

/// Reads up to `limit` records from the journal without repairing it.
pub fn read_records(
    path: &Path,
    journal: JournalName,
    limit: Option<usize>,
) -> CommandResult<Vec<RecordInfo>> {
    let journal_path = path.join(journal.file_name());
    if !journal_path.exists() {
        return Err(format!("Journal file not found: {:?}", journal_path).into());
    }

    let journal = Journal::new(Box::new(FileBackend::open(&journal_path)?));
    let max_records = limit.unwrap_or(usize::MAX);
    journal
        .frames()?
        .iter()
        .take(max_records)
        .map(record_info)
        .collect()
}

fn record_info(frame: &Frame) -> CommandResult<RecordInfo> {
    let value: ciborium::Value = decode_record(frame)?;
    let record = cbor_to_json(value);
    let record_type = match &record {
        serde_json::Value::Object(map) if map.len() == 1 => map.keys().next().cloned(),
        serde_json::Value::String(unit) => Some(unit.clone()),
        _ => None,
    };

    Ok(RecordInfo {
        offset: frame.offset,
        payload_size: frame.payload.len(),
        record_type,
        record,
    })
}

/// Converts a CBOR value to JSON. Byte strings become lowercase hex;
/// sixteen-byte strings are shown as UUIDs since ids are stored that way.
fn cbor_to_json(value: ciborium::Value) -> serde_json::Value {
    use ciborium::Value as Cbor;
    use serde_json::Value as Json;

    match value {
        Cbor::Null => Json::Null,
        Cbor::Bool(b) => Json::Bool(b),
        Cbor::Integer(i) => {
            let i = i128::from(i);
            if let Ok(v) = i64::try_from(i) {
                Json::from(v)
            } else if let Ok(v) = u64::try_from(i) {
                Json::from(v)
            } else {
                Json::String(i.to_string())
            }
        }
        Cbor::Float(f) => serde_json::Number::from_f64(f).map_or(Json::Null, Json::Number),
        Cbor::Text(s) => Json::String(s),
        Cbor::Bytes(bytes) => Json::String(bytes_to_string(&bytes)),
        Cbor::Array(items) => Json::Array(items.into_iter().map(cbor_to_json).collect()),
        Cbor::Map(entries) => Json::Object(
            entries
                .into_iter()
                .map(|(k, v)| {
                    let key = match cbor_to_json(k) {
                        Json::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, cbor_to_json(v))
                })
                .collect(),
        ),
        Cbor::Tag(_, inner) => cbor_to_json(*inner),
        _ => Json::Null,
    }
}

fn bytes_to_string(bytes: &[u8]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    if bytes.len() == 16 {
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    } else {
        hex
    }
}

fn print_text_output(journal: JournalName, records: &[RecordInfo]) {
    println!("{} ({} records)", journal.file_name(), records.len());
    println!("================");
    println!();

    for record in records {
        print!("[{:08}] {:14}", record.offset, record.record_type.as_deref().unwrap_or("?"));
        print!(" payload={} bytes", record.payload_size);
        println!();
        println!("  {}", record.record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{NewAction, SyncContext};
    use serde_json::json;

    #[test]
    fn dumps_action_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let context = SyncContext::open_dir(dir.path()).unwrap();
            let id = context
                .enqueue(NewAction::new("crew.check_in", json!({"crew": "C-2"}), 5))
                .unwrap();
            context.store().remove(&id).unwrap();
            id
        };

        let records = read_records(dir.path(), JournalName::Actions, None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[0].record_type.as_deref(), Some("Enqueued"));
        assert_eq!(records[1].record_type.as_deref(), Some("Removed"));
        assert!(records[0].record.to_string().contains(&id.to_string()));

        let limited = read_records(dir.path(), JournalName::Actions, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn missing_journal_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_records(dir.path(), JournalName::DeadLetters, None).is_err());
    }

    #[test]
    fn sixteen_bytes_render_as_uuid() {
        let bytes: Vec<u8> = (0u8..16).collect();
        assert_eq!(
            bytes_to_string(&bytes),
            "00010203-0405-0607-0809-0a0b0c0d0e0f"
        );
        assert_eq!(bytes_to_string(&[0xab, 0x01]), "ab01");
    }
}
