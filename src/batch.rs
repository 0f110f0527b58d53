// vecload — batch.rs
// Bounded record buffer kept in column layout, ready for a single insert call.
// Author: d65v <https://github.com/d65v>

use crate::Record;

// ── Batch Accumulator ─────────────────────────────────────────────────────────

/// Ordered buffer of at most `capacity` records.
///
/// Ids and vectors are held as separate columns because that is the shape
/// every sink insert takes. The buffers are reused across flushes.
#[derive(Debug)]
pub struct Batch {
    capacity: usize,
    ids: Vec<i64>,
    vectors: Vec<Vec<f32>>,
}

impl Batch {
    /// # Panics
    /// Panics if `capacity` is zero; the config layer rejects that earlier.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "batch capacity must be > 0");
        Self {
            capacity,
            ids: Vec::with_capacity(capacity),
            vectors: Vec::with_capacity(capacity),
        }
    }

    /// Append a record. Returns `true` once the batch has reached capacity
    /// and must be flushed before the next push.
    pub fn push(&mut self, record: Record) -> bool {
        debug_assert!(!self.is_full(), "push into a full batch");
        self.ids.push(record.id);
        self.vectors.push(record.vector);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.ids.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Drop buffered records, keeping the allocation.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.vectors.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: i64) -> Record {
        Record {
            id,
            vector: vec![0.5; 3],
        }
    }

    #[test]
    fn test_push_reports_full_at_capacity() {
        let mut batch = Batch::with_capacity(3);
        assert!(!batch.push(rec(0)));
        assert!(!batch.push(rec(1)));
        assert!(batch.push(rec(2)));
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.ids(), &[0, 1, 2]);
    }

    #[test]
    fn test_clear_resets_but_keeps_capacity() {
        let mut batch = Batch::with_capacity(2);
        batch.push(rec(7));
        batch.push(rec(8));
        batch.clear();
        assert!(batch.is_empty());
        assert!(!batch.is_full());
        assert_eq!(batch.capacity(), 2);
    }

    #[test]
    fn test_columns_stay_aligned() {
        let mut batch = Batch::with_capacity(4);
        batch.push(Record { id: 10, vector: vec![1.0, 2.0] });
        batch.push(Record { id: 11, vector: vec![3.0, 4.0] });
        assert_eq!(batch.ids().len(), batch.vectors().len());
        assert_eq!(batch.vectors()[1], vec![3.0, 4.0]);
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        let _ = Batch::with_capacity(0);
    }
}
