//! In-memory record index shared by the store backends
//!
//! Keeps records by internal id, a timestamp-ordered list for paging and a
//! sparse native-id index (most records only carry some platform ids).

use super::{clamp_limit, MessageRecord};
use crate::error::{Error, Result};
use crate::relay::types::NativeId;
use std::collections::HashMap;

#[derive(Default)]
pub(super) struct RecordIndex {
    records: HashMap<String, MessageRecord>,
    /// (timestamp, internal id), ascending; equal timestamps keep insertion order
    by_time: Vec<(f64, String)>,
    by_native_id: HashMap<NativeId, String>,
}

impl RecordIndex {
    pub(super) fn from_records(mut records: Vec<MessageRecord>) -> Self {
        records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        let mut index = Self::default();
        for record in records {
            index.insert(record);
        }
        index
    }

    pub(super) fn insert(&mut self, record: MessageRecord) {
        for id in record.native_ids() {
            self.by_native_id.insert(id, record.internal_id.clone());
        }
        let pos = self
            .by_time
            .partition_point(|(ts, _)| *ts <= record.timestamp);
        self.by_time
            .insert(pos, (record.timestamp, record.internal_id.clone()));
        self.records.insert(record.internal_id.clone(), record);
    }

    pub(super) fn get(&self, internal_id: &str) -> Option<&MessageRecord> {
        self.records.get(internal_id)
    }

    pub(super) fn find(&self, id: &NativeId) -> Option<&MessageRecord> {
        self.by_native_id
            .get(id)
            .and_then(|internal_id| self.records.get(internal_id))
    }

    pub(super) fn list(&self, limit: usize, offset: usize) -> Vec<MessageRecord> {
        self.by_time
            .iter()
            .rev()
            .skip(offset)
            .take(clamp_limit(limit))
            .filter_map(|(_, id)| self.records.get(id).cloned())
            .collect()
    }

    pub(super) fn len(&self) -> usize {
        self.records.len()
    }

    /// Compute the record as it would look after setting `id`.
    ///
    /// Returns `None` when the record already holds exactly this id.
    pub(super) fn prepare_update(
        &self,
        internal_id: &str,
        id: &NativeId,
    ) -> Result<Option<MessageRecord>> {
        let record = self
            .records
            .get(internal_id)
            .ok_or_else(|| Error::NotFound(format!("Message {} not found", internal_id)))?;
        if record.platform_id(id.platform()).as_ref() == Some(id) {
            return Ok(None);
        }
        let mut updated = record.clone();
        updated.set_platform_id(id.clone());
        Ok(Some(updated))
    }

    /// Replace a record with an updated copy produced by `prepare_update`
    pub(super) fn commit_update(&mut self, updated: MessageRecord) {
        if let Some(previous) = self.records.get(&updated.internal_id) {
            for old in previous.native_ids() {
                if !updated.native_ids().contains(&old) {
                    if self.by_native_id.get(&old) == Some(&updated.internal_id) {
                        self.by_native_id.remove(&old);
                    }
                }
            }
        }
        for id in updated.native_ids() {
            self.by_native_id.insert(id, updated.internal_id.clone());
        }
        self.records.insert(updated.internal_id.clone(), updated);
    }
}
