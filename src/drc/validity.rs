//! Validity cache: per-cell record of the last clean full check
//!
//! A record is only honoured when the rule-context bits of the new request
//! match the bits it was recorded under. Records persist in the library
//! metadata as base64-encoded MessagePack.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::ContextBits;
use crate::layout::{CellId, Library};

/// Library metadata key holding the persisted records
pub const VALIDITY_METADATA_KEY: &str = "drc.validity";

/// Opaque check timestamp (milliseconds since the Unix epoch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidityRecord {
    pub timestamp: Timestamp,
    pub bits: ContextBits,
    pub technology: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidityLoadError {
    #[error("validity metadata is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("validity metadata could not be decoded: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

#[derive(Default)]
pub struct ValidityCache {
    records: RwLock<HashMap<CellId, ValidityRecord>>,
}

impl ValidityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the last clean check, if it ran under exactly `bits`
    pub fn is_valid(&self, cell: &CellId, bits: ContextBits) -> Option<Timestamp> {
        let records = self.records.read().expect("validity lock poisoned");
        records
            .get(cell)
            .filter(|r| r.bits == bits)
            .map(|r| r.timestamp)
    }

    pub fn record_success(&self, cell: &CellId, technology: &str, timestamp: Timestamp, bits: ContextBits) {
        let mut records = self.records.write().expect("validity lock poisoned");
        records.insert(
            cell.clone(),
            ValidityRecord {
                timestamp,
                bits,
                technology: technology.to_string(),
            },
        );
    }

    pub fn invalidate(&self, cell: &CellId) -> bool {
        let mut records = self.records.write().expect("validity lock poisoned");
        records.remove(cell).is_some()
    }

    /// Invalidate `cell` and every cell that instantiates it, directly or not
    pub fn invalidate_with_ancestors(&self, lib: &Library, cell: &CellId) -> usize {
        let affected = lib.self_and_ancestors(cell);
        let mut records = self.records.write().expect("validity lock poisoned");
        affected.iter().filter(|c| records.remove(*c).is_some()).count()
    }

    /// Drop records of `technology` whose context had foundry `foundry_index`
    /// selected. Records under other foundries stay.
    pub fn invalidate_all_under_foundry(&self, technology: &str, foundry_index: usize) -> usize {
        let mut records = self.records.write().expect("validity lock poisoned");
        let before = records.len();
        records.retain(|_, r| !(r.technology == technology && r.bits.has_foundry(foundry_index)));
        before - records.len()
    }

    /// Drop every record of `technology`, whatever foundry it was taken under
    pub fn invalidate_technology(&self, technology: &str) -> usize {
        let mut records = self.records.write().expect("validity lock poisoned");
        let before = records.len();
        records.retain(|_, r| r.technology != technology);
        before - records.len()
    }

    pub fn record(&self, cell: &CellId) -> Option<ValidityRecord> {
        let records = self.records.read().expect("validity lock poisoned");
        records.get(cell).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("validity lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write all records into the library metadata
    pub fn store_into(&self, lib: &mut Library) -> Result<(), rmp_serde::encode::Error> {
        let records = self.records.read().expect("validity lock poisoned");
        let bytes = rmp_serde::to_vec_named(&*records)?;
        lib.metadata.insert(
            VALIDITY_METADATA_KEY.to_string(),
            general_purpose::STANDARD.encode(bytes),
        );
        Ok(())
    }

    /// Load records from the library metadata; an absent entry yields an empty cache
    pub fn load_from(lib: &Library) -> Result<Self, ValidityLoadError> {
        let Some(encoded) = lib.metadata.get(VALIDITY_METADATA_KEY) else {
            return Ok(Self::new());
        };
        let bytes = general_purpose::STANDARD.decode(encoded)?;
        let records: HashMap<CellId, ValidityRecord> = rmp_serde::from_slice(&bytes)?;
        Ok(Self {
            records: RwLock::new(records),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gating_by_bits_and_invalidate() {
        let cache = ValidityCache::new();
        let a = CellId::from("a");
        let bits = ContextBits::new(true, Some(0));
        cache.record_success(&a, "mocmos", Timestamp(42), bits);

        assert_eq!(cache.is_valid(&a, bits), Some(Timestamp(42)));
        assert_eq!(cache.is_valid(&a, ContextBits::new(false, Some(0))), None);

        assert!(cache.invalidate(&a));
        assert_eq!(cache.is_valid(&a, bits), None);
    }

    #[test]
    fn test_invalidate_under_foundry_is_selective() {
        let cache = ValidityCache::new();
        cache.record_success(&CellId::from("a"), "mocmos", Timestamp(1), ContextBits::new(true, Some(0)));
        cache.record_success(&CellId::from("b"), "mocmos", Timestamp(2), ContextBits::new(true, Some(1)));
        cache.record_success(&CellId::from("c"), "other", Timestamp(3), ContextBits::new(true, Some(0)));

        assert_eq!(cache.invalidate_all_under_foundry("mocmos", 0), 1);
        assert!(cache.record(&CellId::from("a")).is_none());
        assert!(cache.record(&CellId::from("b")).is_some());
        assert!(cache.record(&CellId::from("c")).is_some());
    }

    #[test]
    fn test_invalidate_technology_spans_foundries() {
        let cache = ValidityCache::new();
        cache.record_success(&CellId::from("a"), "mocmos", Timestamp(1), ContextBits::new(true, Some(0)));
        cache.record_success(&CellId::from("b"), "mocmos", Timestamp(2), ContextBits::new(true, Some(1)));
        cache.record_success(&CellId::from("c"), "other", Timestamp(3), ContextBits::new(true, Some(1)));

        assert_eq!(cache.invalidate_technology("mocmos"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.record(&CellId::from("c")).is_some());
    }

    #[test]
    fn test_metadata_roundtrip() {
        let cache = ValidityCache::new();
        let bits = ContextBits::new(true, Some(2));
        cache.record_success(&CellId::from("top"), "mocmos", Timestamp(99), bits);

        let mut lib = Library::new("lib");
        cache.store_into(&mut lib).unwrap();
        let text = lib.to_json_string().unwrap();
        let reloaded = Library::from_json_str(&text).unwrap();

        let restored = ValidityCache::load_from(&reloaded).unwrap();
        assert_eq!(restored.is_valid(&CellId::from("top"), bits), Some(Timestamp(99)));
    }
}
