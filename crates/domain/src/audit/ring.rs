use std::sync::Arc;

use super::entity::AuditRecord;

/// Answer to an ETag poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    NotModified,
    Changed {
        items: Vec<Arc<AuditRecord>>,
        etag: u64,
    },
}

/// Fixed-capacity ring of audit records.
///
/// Slots are allocated once. `head` is the sequence number of the most
/// recent append (0 when empty); record `seq` lives in slot
/// `(seq - 1) % capacity`, so the oldest retained sequence is always
/// `head - len + 1`.
#[derive(Debug)]
pub struct AuditRing {
    slots: Box<[Option<Arc<AuditRecord>>]>,
    head: u64,
}

impl AuditRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            head: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> usize {
        self.head.min(self.slots.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head == 0
    }

    /// Sequence number of the newest record; doubles as the ETag.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Append, overwriting the oldest record when full. Returns the
    /// assigned sequence number.
    pub fn push(&mut self, mut record: AuditRecord) -> Arc<AuditRecord> {
        self.head += 1;
        record.seq = self.head;
        let record = Arc::new(record);
        let idx = self.slot_of(self.head);
        self.slots[idx] = Some(Arc::clone(&record));
        record
    }

    /// Records with `seq > after`, oldest first. Evicted records are gone.
    pub fn since(&self, after: u64) -> Vec<Arc<AuditRecord>> {
        let oldest = self.oldest_seq();
        let start = after.saturating_add(1).max(oldest);
        if self.head == 0 || start > self.head {
            return Vec::new();
        }
        (start..=self.head)
            .filter_map(|seq| self.slots[self.slot_of(seq)].clone())
            .collect()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<AuditRecord>> {
        let oldest = self.oldest_seq();
        (oldest..=self.head).filter_map(move |seq| self.slots[self.slot_of(seq)].as_ref())
    }

    /// Compare the caller's last-seen sequence to the head.
    ///
    /// A missing tag, or one ahead of the head (the ring was rebuilt),
    /// returns the whole window.
    pub fn poll(&self, etag: Option<u64>) -> PollResult {
        match etag {
            Some(tag) if tag == self.head => PollResult::NotModified,
            Some(tag) if tag < self.head => PollResult::Changed {
                items: self.since(tag),
                etag: self.head,
            },
            _ => PollResult::Changed {
                items: self.since(0),
                etag: self.head,
            },
        }
    }

    fn oldest_seq(&self) -> u64 {
        (self.head + 1).saturating_sub(self.len() as u64).max(1)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn slot_of(&self, seq: u64) -> usize {
        ((seq - 1) % self.slots.len() as u64) as usize
    }
}
