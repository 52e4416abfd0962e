//! Property tests for frame scanning and journal recovery.

use fieldsync_journal::frame::{encode_frame, scan_frames};
use fieldsync_journal::{FrameKind, InMemoryBackend, Journal};
use proptest::prelude::*;

fn payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..20)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn scan_returns_every_frame_at_its_offset(payloads in payloads()) {
        let mut data = Vec::new();
        let mut offsets = Vec::new();
        for payload in &payloads {
            offsets.push(data.len() as u64);
            data.extend(encode_frame(FrameKind::Record, payload).unwrap());
        }

        let scan = scan_frames(&data).unwrap();
        prop_assert_eq!(scan.valid_len, data.len() as u64);
        prop_assert_eq!(scan.frames.len(), payloads.len());
        for ((frame, payload), offset) in scan.frames.iter().zip(&payloads).zip(&offsets) {
            prop_assert_eq!(frame.kind, FrameKind::Record);
            prop_assert_eq!(&frame.payload, payload);
            prop_assert_eq!(frame.offset, *offset);
        }
    }

    #[test]
    fn cut_journal_recovers_a_prefix(
        records in prop::collection::vec("[a-z]{0,12}", 1..12),
        cut in any::<prop::sample::Index>(),
    ) {
        let backend = InMemoryBackend::new();
        let journal = Journal::new(Box::new(backend.clone()));
        for record in &records {
            journal.append(record).unwrap();
        }

        let data = backend.data();
        let cut = cut.index(data.len() + 1);
        let torn = InMemoryBackend::with_data(data[..cut].to_vec());
        let reopened = Journal::new(Box::new(torn.clone()));

        let recovered: Vec<String> = reopened.recover().unwrap();
        prop_assert!(recovered.len() <= records.len());
        prop_assert_eq!(&recovered[..], &records[..recovered.len()]);

        // Whatever survived is frame-aligned, so a new append reads back.
        reopened.append(&"after".to_string()).unwrap();
        let again: Vec<String> = reopened.read_all().unwrap();
        prop_assert_eq!(again.last().map(String::as_str), Some("after"));
        prop_assert_eq!(again.len(), recovered.len() + 1);
    }
}
