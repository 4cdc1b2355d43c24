use crate::dom::NodeKey;
use crate::model::{Record, RecordKind};

/// Sibling references captured when an insertion is observed. Siblings may
/// not have ids yet; they are resolved (or dropped) before the record leaves
/// the recorder and never serialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransientSiblings {
    pub prev: Option<NodeKey>,
    pub next: Option<NodeKey>,
}

impl TransientSiblings {
    fn is_settled(&self) -> bool {
        self.prev.is_none() && self.next.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub record: Record,
    pub siblings: Option<TransientSiblings>,
}

/// Unbounded record buffer with deferred sibling resolution.
#[derive(Debug)]
pub struct RecordBuffer {
    items: Vec<PendingRecord>,
    /// Everything before this offset is fully resolved.
    resolved: usize,
    buffer_size: usize,
    max_emit_size: usize,
}

impl RecordBuffer {
    pub fn new(buffer_size: usize, max_emit_size: usize) -> Self {
        Self {
            items: Vec::new(),
            resolved: 0,
            buffer_size: buffer_size.max(1),
            max_emit_size: max_emit_size.max(1),
        }
    }

    pub fn append(&mut self, record: Record, siblings: Option<TransientSiblings>) {
        self.items.push(PendingRecord { record, siblings });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.resolved = 0;
    }

    /// Resolve pending sibling references and, when allowed, drain the buffer
    /// into chunks of at most `max_emit_size` records.
    ///
    /// A reference that cannot be resolved stops the scan unless `is_final`,
    /// in which case it is dropped and the record kept. Nothing drains until
    /// `ready`, and then only once the buffer reached `buffer_size` or on the
    /// final flush.
    pub fn flush(
        &mut self,
        is_final: bool,
        ready: bool,
        resolve: impl Fn(NodeKey) -> Option<u64>,
    ) -> Vec<Vec<Record>> {
        while self.resolved < self.items.len() {
            let item = &mut self.items[self.resolved];
            if let Some(siblings) = item.siblings.as_mut() {
                let record_id = item.record.record_id;
                let RecordKind::NodeInsertion {
                    prev_sibling_id,
                    next_sibling_id,
                    ..
                } = &mut item.record.kind
                else {
                    item.siblings = None;
                    self.resolved += 1;
                    continue;
                };
                for (slot, resolved, which) in [
                    (&mut siblings.prev, prev_sibling_id, "previous"),
                    (&mut siblings.next, next_sibling_id, "next"),
                ] {
                    let Some(key) = *slot else { continue };
                    match resolve(key) {
                        Some(id) => {
                            *resolved = Some(id);
                            *slot = None;
                        }
                        None if is_final => {
                            tracing::error!(record_id, sibling = which, "sibling never resolved, dropping reference");
                            *slot = None;
                        }
                        None => {
                            tracing::trace!(record_id, sibling = which, "sibling unresolved, retrying on next flush");
                        }
                    }
                }
                if !siblings.is_settled() {
                    return Vec::new();
                }
                item.siblings = None;
            }
            self.resolved += 1;
        }

        if !ready || !(is_final || self.items.len() >= self.buffer_size) {
            return Vec::new();
        }

        let drained: Vec<Record> = std::mem::take(&mut self.items)
            .into_iter()
            .map(|pending| pending.record)
            .collect();
        self.resolved = 0;
        drained
            .chunks(self.max_emit_size)
            .map(<[Record]>::to_vec)
            .collect()
    }
}
