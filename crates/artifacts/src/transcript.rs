//! Transcript store
//!
//! Each vat's transcript is an append-only sequence of entries split into
//! spans. Exactly one span is open while the vat is live; closing it is
//! always paired with opening the next, except when the vat is stopped.
//!
//! ```text
//!            init_vat                rollover_span / rollover_incarnation
//!  NoSpan ─────────────► Open(span) ◄──────────────┐
//!                          │   └───────────────────┘
//!                          │ stop_using_transcript
//!                          ▼
//!                       Stopped ──── delete_vat_transcript ───► NoSpan
//! ```
//!
//! Positions are contiguous from 0: every span starts where the previous
//! one ended. The open span's hash is updated on every append, so closing
//! a span never re-reads its entries.

use crate::keys;
use crate::records::{read_json, scan_json, write_json, SpanRecord};
use tracing::{debug, info};
use vatstore_core::{ContentHash, Error, Result, SpanHasher, TranscriptEntry, VatId};
use vatstore_storage::{HostTransaction, KvRead};

/// Lifecycle state of a vat's transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanState {
    /// The vat has no transcript
    NoSpan,
    /// The vat is live; this is its open span
    Open(SpanRecord),
    /// The transcript was closed for good; `last` is the final span
    Stopped {
        /// Last closed span
        last: SpanRecord,
    },
}

/// Transcript operations over a host transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct TranscriptStore {
    max_span_entries: Option<u64>,
}

impl TranscriptStore {
    /// Create a store, rolling spans over at `max_span_entries` if set
    pub fn new(max_span_entries: Option<u64>) -> Self {
        TranscriptStore { max_span_entries }
    }

    /// Current lifecycle state of a vat
    pub fn state<K: KvRead + ?Sized>(&self, kv: &K, vat_id: &VatId) -> Result<SpanState> {
        if let Some(current) = self.current_span(kv, vat_id)? {
            return Ok(SpanState::Open(current));
        }
        let closed: Vec<SpanRecord> = scan_json(kv, &keys::closed_spans_prefix(vat_id))?;
        Ok(match closed.into_iter().last() {
            Some(last) => SpanState::Stopped { last },
            None => SpanState::NoSpan,
        })
    }

    /// The vat's open span, if any
    pub fn current_span<K: KvRead + ?Sized>(
        &self,
        kv: &K,
        vat_id: &VatId,
    ) -> Result<Option<SpanRecord>> {
        read_json(kv, &keys::current_span(vat_id))
    }

    /// The span starting at `start_pos`, open or closed
    pub fn span<K: KvRead + ?Sized>(
        &self,
        kv: &K,
        vat_id: &VatId,
        start_pos: u64,
    ) -> Result<Option<SpanRecord>> {
        if let Some(current) = self.current_span(kv, vat_id)? {
            if current.start_pos == start_pos {
                return Ok(Some(current));
            }
        }
        read_json(kv, &keys::closed_span(vat_id, start_pos))
    }

    /// Every span of a vat in position order, the open one last
    pub fn list_spans<K: KvRead + ?Sized>(&self, kv: &K, vat_id: &VatId) -> Result<Vec<SpanRecord>> {
        let mut spans: Vec<SpanRecord> = scan_json(kv, &keys::closed_spans_prefix(vat_id))?;
        if let Some(current) = self.current_span(kv, vat_id)? {
            spans.push(current);
        }
        Ok(spans)
    }

    /// Create the vat's first span at position 0, incarnation 0
    pub fn init_vat(&self, txn: &mut HostTransaction<'_>, vat_id: &VatId) -> Result<SpanRecord> {
        match self.state(&*txn, vat_id)? {
            SpanState::NoSpan => {}
            _ => {
                return Err(Error::InvalidOperation(format!(
                    "vat {} already has a transcript",
                    vat_id
                )))
            }
        }
        let span = SpanRecord::open(vat_id.clone(), 0, 0);
        self.put_record(txn, &span)?;
        debug!(vat = %vat_id, "initialized transcript");
        Ok(span)
    }

    fn open_span(&self, txn: &mut HostTransaction<'_>, vat_id: &VatId) -> Result<SpanRecord> {
        self.current_span(&*txn, vat_id)?
            .ok_or_else(|| Error::NoActiveSpan {
                vat_id: vat_id.clone(),
            })
    }

    /// Append one entry at `position`, which must be the open span's end
    ///
    /// Returns the position following the entry.
    pub fn append_entry(
        &self,
        txn: &mut HostTransaction<'_>,
        vat_id: &VatId,
        position: u64,
        entry: &TranscriptEntry,
    ) -> Result<u64> {
        let mut span = self.open_span(txn, vat_id)?;
        if position != span.end_pos {
            return Err(Error::OutOfOrder {
                vat_id: vat_id.clone(),
                expected: span.end_pos,
                actual: position,
            });
        }

        let item = entry.encode()?;
        span.hash = span.hash.chain(&item);
        span.end_pos += 1;
        txn.put(keys::item(vat_id, position), item);

        let next = span.end_pos;
        match self.max_span_entries {
            Some(max) if span.len() >= max => {
                debug!(vat = %vat_id, position = next, entries = span.len(), "span size threshold reached");
                self.close_and_open(txn, span, None)?;
            }
            _ => self.put_record(txn, &span)?,
        }
        Ok(next)
    }

    /// Close the open span at `new_position` and open the next one there
    ///
    /// Returns the closed span. An empty open span already starts at the
    /// boundary, so it is left open and returned as is.
    pub fn rollover_span(
        &self,
        txn: &mut HostTransaction<'_>,
        vat_id: &VatId,
        new_position: u64,
    ) -> Result<SpanRecord> {
        let span = self.open_span(txn, vat_id)?;
        if new_position != span.end_pos {
            return Err(Error::PositionMismatch {
                vat_id: vat_id.clone(),
                expected: span.end_pos,
                actual: new_position,
            });
        }
        if span.is_empty() {
            debug!(vat = %vat_id, position = new_position, "open span is empty, rollover skipped");
            return Ok(span);
        }
        self.close_and_open(txn, span, None)
    }

    /// Close the open span and open the next one in a new incarnation
    ///
    /// An empty open span is moved to the new incarnation in place.
    /// Returns the new incarnation number.
    pub fn rollover_incarnation(&self, txn: &mut HostTransaction<'_>, vat_id: &VatId) -> Result<u64> {
        let mut span = self.open_span(txn, vat_id)?;
        let incarnation = span.incarnation + 1;
        if span.is_empty() {
            span.incarnation = incarnation;
            self.put_record(txn, &span)?;
            info!(vat = %vat_id, start = span.start_pos, incarnation, "started incarnation");
        } else {
            self.close_and_open(txn, span, Some(incarnation))?;
        }
        Ok(incarnation)
    }

    /// Close the open span without opening another
    pub fn stop_using_transcript(
        &self,
        txn: &mut HostTransaction<'_>,
        vat_id: &VatId,
    ) -> Result<SpanRecord> {
        let span = self.open_span(txn, vat_id)?;
        let closed = self.close(txn, span)?;
        info!(vat = %vat_id, end = closed.end_pos, "stopped transcript");
        Ok(closed)
    }

    /// Remove every span record and entry of a stopped vat
    ///
    /// Returns the number of keys removed.
    pub fn delete_vat_transcript(&self, txn: &mut HostTransaction<'_>, vat_id: &VatId) -> Result<usize> {
        if let SpanState::Open(_) = self.state(&*txn, vat_id)? {
            return Err(Error::InvalidOperation(format!(
                "vat {} transcript is still in use",
                vat_id
            )));
        }
        let removed = txn.delete_prefix(&keys::closed_spans_prefix(vat_id))?
            + txn.delete_prefix(&keys::items_prefix(vat_id))?;
        info!(vat = %vat_id, removed, "deleted transcript");
        Ok(removed)
    }

    fn close(&self, txn: &mut HostTransaction<'_>, mut span: SpanRecord) -> Result<SpanRecord> {
        span.is_current = false;
        txn.delete(keys::current_span(&span.vat_id));
        self.put_record(txn, &span)?;
        Ok(span)
    }

    fn close_and_open(
        &self,
        txn: &mut HostTransaction<'_>,
        span: SpanRecord,
        incarnation: Option<u64>,
    ) -> Result<SpanRecord> {
        let closed = self.close(txn, span)?;
        let next = SpanRecord::open(
            closed.vat_id.clone(),
            closed.end_pos,
            incarnation.unwrap_or(closed.incarnation),
        );
        self.put_record(txn, &next)?;
        info!(
            vat = %closed.vat_id,
            start = closed.start_pos,
            end = closed.end_pos,
            incarnation = next.incarnation,
            "rolled over transcript span"
        );
        Ok(closed)
    }

    /// Store a span record under the key matching its open/closed state
    pub(crate) fn put_record(&self, txn: &mut HostTransaction<'_>, span: &SpanRecord) -> Result<()> {
        let key = if span.is_current {
            keys::current_span(&span.vat_id)
        } else {
            keys::closed_span(&span.vat_id, span.start_pos)
        };
        write_json(txn, key, span)
    }

    fn read_items<K: KvRead + ?Sized>(&self, kv: &K, span: &SpanRecord) -> Result<Vec<Vec<u8>>> {
        if !span.populated {
            return Err(Error::not_found(format!(
                "{} (contents compacted)",
                span.artifact_name()
            )));
        }
        (span.start_pos..span.end_pos)
            .map(|position| {
                kv.get(&keys::item(&span.vat_id, position))?.ok_or_else(|| {
                    Error::Corruption(format!(
                        "{} is missing entry {}",
                        span.artifact_name(),
                        position
                    ))
                })
            })
            .collect()
    }

    /// Entries of the span starting at `start_pos`
    pub fn read_span<K: KvRead + ?Sized>(
        &self,
        kv: &K,
        vat_id: &VatId,
        start_pos: u64,
    ) -> Result<Vec<TranscriptEntry>> {
        let span = self.span(kv, vat_id, start_pos)?.ok_or_else(|| {
            Error::not_found(format!("transcript span of {} at {}", vat_id, start_pos))
        })?;
        self.read_items(kv, &span)?
            .iter()
            .map(|item| TranscriptEntry::decode(item))
            .collect()
    }

    /// Byte form of a span: every item followed by `\n`
    ///
    /// The stored items are re-hashed against the record.
    pub fn export_span<K: KvRead + ?Sized>(&self, kv: &K, span: &SpanRecord) -> Result<Vec<u8>> {
        let mut hasher = SpanHasher::new();
        let mut bytes = Vec::new();
        for item in self.read_items(kv, span)? {
            hasher.push(&item);
            bytes.extend_from_slice(&item);
            bytes.push(b'\n');
        }
        let actual = hasher.finish();
        if actual != span.hash {
            return Err(Error::Corruption(format!(
                "{} hashes to {}, record says {}",
                span.artifact_name(),
                actual,
                span.hash
            )));
        }
        Ok(bytes)
    }

    /// Store a span from its byte form after checking it against `record`
    pub fn import_span(
        &self,
        txn: &mut HostTransaction<'_>,
        record: &SpanRecord,
        bytes: &[u8],
    ) -> Result<()> {
        let items = split_span(record, bytes)?;
        let mut hasher = SpanHasher::new();
        for item in &items {
            hasher.push(item);
        }
        verify_span(record, &hasher)?;

        for (offset, item) in items.into_iter().enumerate() {
            txn.put(
                keys::item(&record.vat_id, record.start_pos + offset as u64),
                item.to_vec(),
            );
        }
        let mut record = record.clone();
        record.populated = true;
        self.put_record(txn, &record)
    }

    /// Store only the record of a span whose contents were not exported
    pub fn import_span_record(&self, txn: &mut HostTransaction<'_>, record: &SpanRecord) -> Result<()> {
        let mut record = record.clone();
        record.populated = false;
        self.put_record(txn, &record)
    }

    /// Delete a closed span's entries, keeping its record
    ///
    /// Returns the number of entries removed.
    pub fn prune_span_contents(&self, txn: &mut HostTransaction<'_>, span: &SpanRecord) -> Result<u64> {
        if span.is_current {
            return Err(Error::InvalidOperation(format!(
                "{} is the open span",
                span.artifact_name()
            )));
        }
        if !span.populated {
            return Ok(0);
        }
        for position in span.start_pos..span.end_pos {
            txn.delete(keys::item(&span.vat_id, position));
        }
        let mut record = span.clone();
        record.populated = false;
        self.put_record(txn, &record)?;
        debug!(vat = %span.vat_id, start = span.start_pos, end = span.end_pos, "pruned span contents");
        Ok(span.len())
    }
}

fn split_span<'b>(record: &SpanRecord, bytes: &'b [u8]) -> Result<Vec<&'b [u8]>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let body = bytes.strip_suffix(b"\n").ok_or_else(|| {
        Error::inconsistent(
            record.artifact_name().to_string(),
            "span bytes must end with a newline",
        )
    })?;
    Ok(body.split(|b| *b == b'\n').collect())
}

fn verify_span(record: &SpanRecord, hasher: &SpanHasher) -> Result<()> {
    if hasher.items() != record.len() {
        return Err(Error::inconsistent(
            record.artifact_name().to_string(),
            format!("holds {} entries, record covers {}", hasher.items(), record.len()),
        ));
    }
    let actual = hasher.finish();
    if actual != record.hash {
        return Err(Error::hash_mismatch(
            record.artifact_name().to_string(),
            record.hash,
            actual,
        ));
    }
    Ok(())
}

/// Hash of a span's byte form, without storing it
///
/// Fails with `InconsistentImport` if non-empty bytes do not end with a
/// newline.
pub fn hash_span_bytes(bytes: &[u8]) -> Result<ContentHash> {
    let mut hasher = SpanHasher::new();
    if bytes.is_empty() {
        return Ok(hasher.finish());
    }
    let body = bytes
        .strip_suffix(b"\n")
        .ok_or_else(|| Error::inconsistent("span bytes", "final entry is not newline-terminated"))?;
    for item in body.split(|b| *b == b'\n') {
        hasher.push(item);
    }
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vatstore_storage::{HostStore, HostStoreExt, MemoryStore};

    fn vat() -> VatId {
        VatId::new("v1").unwrap()
    }

    fn entry(n: u64) -> TranscriptEntry {
        TranscriptEntry::new(n, json!({"type": "message", "n": n}))
    }

    fn live_store() -> MemoryStore {
        let store = MemoryStore::new();
        let mut txn = store.begin();
        TranscriptStore::default().init_vat(&mut txn, &vat()).unwrap();
        txn.commit().unwrap();
        store
    }

    #[test]
    fn test_append_and_read_current() {
        let store = live_store();
        let transcripts = TranscriptStore::default();
        let mut txn = store.begin();
        for pos in 0..3 {
            assert_eq!(transcripts.append_entry(&mut txn, &vat(), pos, &entry(pos)).unwrap(), pos + 1);
        }
        txn.commit().unwrap();

        let view = store.read_view();
        let entries = transcripts.read_span(&view, &vat(), 0).unwrap();
        assert_eq!(entries, vec![entry(0), entry(1), entry(2)]);
        let span = transcripts.current_span(&view, &vat()).unwrap().unwrap();
        assert_eq!((span.start_pos, span.end_pos), (0, 3));
    }

    #[test]
    fn test_append_requires_live_vat() {
        let store = MemoryStore::new();
        let mut txn = store.begin();
        let err = TranscriptStore::default()
            .append_entry(&mut txn, &vat(), 0, &entry(0))
            .unwrap_err();
        assert!(matches!(err, Error::NoActiveSpan { .. }));
    }

    #[test]
    fn test_out_of_order_append() {
        let store = live_store();
        let mut txn = store.begin();
        let err = TranscriptStore::default()
            .append_entry(&mut txn, &vat(), 1, &entry(1))
            .unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { expected: 0, actual: 1, .. }));
    }

    #[test]
    fn test_rollover_freezes_hash() {
        let store = live_store();
        let transcripts = TranscriptStore::default();
        let mut txn = store.begin();
        for pos in 0..2 {
            transcripts.append_entry(&mut txn, &vat(), pos, &entry(pos)).unwrap();
        }
        let closed = transcripts.rollover_span(&mut txn, &vat(), 2).unwrap();
        txn.commit().unwrap();

        let mut expected = SpanHasher::new();
        expected.push(&entry(0).encode().unwrap());
        expected.push(&entry(1).encode().unwrap());
        assert_eq!(closed.hash, expected.finish());
        assert!(!closed.is_current);

        let view = store.read_view();
        let spans = transcripts.list_spans(&view, &vat()).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].start_pos, 2);
        assert!(spans[1].is_current);
    }

    #[test]
    fn test_rollover_position_mismatch() {
        let store = live_store();
        let mut txn = store.begin();
        let err = TranscriptStore::default()
            .rollover_span(&mut txn, &vat(), 5)
            .unwrap_err();
        assert!(matches!(err, Error::PositionMismatch { expected: 0, actual: 5, .. }));
    }

    #[test]
    fn test_size_threshold_rolls_over() {
        let store = live_store();
        let transcripts = TranscriptStore::new(Some(3));
        let mut txn = store.begin();
        for pos in 0..7 {
            transcripts.append_entry(&mut txn, &vat(), pos, &entry(pos)).unwrap();
        }
        let ranges: Vec<(u64, u64)> = transcripts
            .list_spans(&txn, &vat())
            .unwrap()
            .iter()
            .map(|s| (s.start_pos, s.end_pos))
            .collect();
        assert_eq!(ranges, vec![(0, 3), (3, 6), (6, 7)]);
    }

    #[test]
    fn test_stop_and_delete() {
        let store = live_store();
        let transcripts = TranscriptStore::default();
        let mut txn = store.begin();
        transcripts.append_entry(&mut txn, &vat(), 0, &entry(0)).unwrap();
        assert!(transcripts.delete_vat_transcript(&mut txn, &vat()).is_err());

        transcripts.stop_using_transcript(&mut txn, &vat()).unwrap();
        assert!(matches!(transcripts.state(&txn, &vat()).unwrap(), SpanState::Stopped { .. }));
        assert!(matches!(
            transcripts.append_entry(&mut txn, &vat(), 1, &entry(1)),
            Err(Error::NoActiveSpan { .. })
        ));

        assert_eq!(transcripts.delete_vat_transcript(&mut txn, &vat()).unwrap(), 2);
        assert_eq!(transcripts.state(&txn, &vat()).unwrap(), SpanState::NoSpan);
    }

    #[test]
    fn test_init_twice_fails() {
        let store = live_store();
        let mut txn = store.begin();
        assert!(matches!(
            TranscriptStore::default().init_vat(&mut txn, &vat()),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_incarnation_rollover() {
        let store = live_store();
        let transcripts = TranscriptStore::default();
        let mut txn = store.begin();
        transcripts.append_entry(&mut txn, &vat(), 0, &entry(0)).unwrap();
        assert_eq!(transcripts.rollover_incarnation(&mut txn, &vat()).unwrap(), 1);
        let current = transcripts.current_span(&txn, &vat()).unwrap().unwrap();
        assert_eq!((current.start_pos, current.incarnation), (1, 1));
    }

    #[test]
    fn test_empty_span_rollover_is_a_no_op() {
        let store = live_store();
        let transcripts = TranscriptStore::default();
        let mut txn = store.begin();
        let span = transcripts.rollover_span(&mut txn, &vat(), 0).unwrap();
        assert!(span.is_current);
        assert_eq!(transcripts.rollover_incarnation(&mut txn, &vat()).unwrap(), 1);

        let spans = transcripts.list_spans(&txn, &vat()).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!((spans[0].start_pos, spans[0].incarnation), (0, 1));
    }

    #[test]
    fn test_export_import_span_bytes() {
        let store = live_store();
        let transcripts = TranscriptStore::default();
        let mut txn = store.begin();
        for pos in 0..4 {
            transcripts.append_entry(&mut txn, &vat(), pos, &entry(pos)).unwrap();
        }
        let closed = transcripts.rollover_span(&mut txn, &vat(), 4).unwrap();
        txn.commit().unwrap();

        let bytes = transcripts.export_span(&store.read_view(), &closed).unwrap();
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 4);
        assert_eq!(hash_span_bytes(&bytes).unwrap(), closed.hash);

        let target = MemoryStore::new();
        let mut txn = target.begin();
        transcripts.import_span(&mut txn, &closed, &bytes).unwrap();
        txn.commit().unwrap();
        assert_eq!(
            transcripts.read_span(&target.read_view(), &vat(), 0).unwrap().len(),
            4
        );

        let mut tampered = bytes.clone();
        tampered[2] ^= 0x20;
        let mut txn = target.begin();
        assert!(matches!(
            transcripts.import_span(&mut txn, &closed, &tampered),
            Err(Error::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_span_bytes() {
        let span = SpanRecord::open(vat(), 5, 0);
        assert_eq!(hash_span_bytes(b"").unwrap(), span.hash);
        let store = MemoryStore::new();
        let mut txn = store.begin();
        TranscriptStore::default().import_span(&mut txn, &span, b"").unwrap();
    }

    #[test]
    fn test_unterminated_span_bytes_are_rejected() {
        let first = serde_json::to_vec(&entry(0)).unwrap();
        let mut bytes = first.clone();
        bytes.push(b'\n');
        assert!(hash_span_bytes(&bytes).is_ok());

        assert!(matches!(
            hash_span_bytes(&first),
            Err(Error::InconsistentImport { .. })
        ));
        bytes.extend_from_slice(&first);
        assert!(matches!(
            hash_span_bytes(&bytes),
            Err(Error::InconsistentImport { .. })
        ));
    }

    #[test]
    fn test_pruned_span_is_not_found() {
        let store = live_store();
        let transcripts = TranscriptStore::default();
        let mut txn = store.begin();
        transcripts.append_entry(&mut txn, &vat(), 0, &entry(0)).unwrap();
        let closed = transcripts.rollover_span(&mut txn, &vat(), 1).unwrap();
        assert_eq!(transcripts.prune_span_contents(&mut txn, &closed).unwrap(), 1);
        txn.commit().unwrap();

        let view = store.read_view();
        assert!(transcripts.read_span(&view, &vat(), 0).unwrap_err().is_not_found());
        let record = transcripts.span(&view, &vat(), 0).unwrap().unwrap();
        assert!(!record.populated);
        assert_eq!(record.hash, closed.hash);
        assert!(view.get(&keys::item(&vat(), 0)).unwrap().is_none());
    }

    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Step {
        Append,
        Rollover,
        Incarnation,
    }

    fn arb_step() -> impl Strategy<Value = Step> {
        prop_oneof![
            6 => Just(Step::Append),
            2 => Just(Step::Rollover),
            1 => Just(Step::Incarnation),
        ]
    }

    proptest! {
        #[test]
        fn spans_stay_contiguous(
            steps in proptest::collection::vec(arb_step(), 0..60),
            threshold in proptest::option::of(1u64..6),
        ) {
            let store = live_store();
            let transcripts = TranscriptStore::new(threshold);
            let mut txn = store.begin();
            let mut next = 0;
            for step in steps {
                match step {
                    Step::Append => {
                        next = transcripts.append_entry(&mut txn, &vat(), next, &entry(next)).unwrap();
                    }
                    Step::Rollover => {
                        transcripts.rollover_span(&mut txn, &vat(), next).unwrap();
                    }
                    Step::Incarnation => {
                        transcripts.rollover_incarnation(&mut txn, &vat()).unwrap();
                    }
                }
            }

            let spans = transcripts.list_spans(&txn, &vat()).unwrap();
            prop_assert_eq!(spans[0].start_pos, 0);
            for pair in spans.windows(2) {
                prop_assert_eq!(pair[0].end_pos, pair[1].start_pos);
                prop_assert!(pair[0].incarnation <= pair[1].incarnation);
            }
            prop_assert_eq!(spans.iter().filter(|s| s.is_current).count(), 1);
            prop_assert!(spans.last().unwrap().is_current);
            prop_assert_eq!(spans.last().unwrap().end_pos, next);
        }
    }
}
