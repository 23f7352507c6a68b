//! Ordered, in-memory transcript of the open thread.
//!
//! Entries are kept in chronological order (oldest first). Each entry carries
//! exactly one authoritative identifier: a server id once persisted, a local id
//! before that. A provisional entry is dropped, never duplicated, as soon as
//! a canonical copy matching it is merged in.

use std::{collections::HashSet, time::Duration};

use shared::{
    domain::{DeliveryStatus, MessageId},
    protocol::MessageDoc,
};

use crate::types::{LocalMessageId, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaceSummary {
    pub canonical: usize,
    pub provisional_kept: usize,
    pub superseded: usize,
}

/// What happened to a provisional entry when its send succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// Swapped for the canonical copy returned by the send.
    Replaced,
    /// No canonical copy available; status moved to `sent` in place.
    MarkedSent,
    /// The canonical copy was already loaded, so the provisional entry was removed.
    Superseded,
    /// The provisional entry is gone (for example a resync already reconciled it).
    Missing,
    /// The provisional entry was gone, yet the returned copy was not loaded; it
    /// was inserted by creation time.
    Restored,
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptStore {
    messages: Vec<Message>,
    server_ids: HashSet<MessageId>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Oldest loaded entry, the boundary that load-more extends.
    pub fn oldest(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn get_local(&self, local_id: LocalMessageId) -> Option<&Message> {
        self.position_of_local(local_id)
            .map(|index| &self.messages[index])
    }

    pub fn contains_server_id(&self, id: &MessageId) -> bool {
        self.server_ids.contains(id)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.server_ids.clear();
    }

    /// Replaces every canonical entry with `docs` (newest first, as the store
    /// returns them). Provisional entries that one of the docs reconciles are
    /// dropped; the rest are merged back by creation time.
    ///
    /// Only docs that were not loaded before the replace can reconcile a
    /// provisional entry, and `failed` entries are never reconciled: they were
    /// not persisted.
    pub fn replace_with_canonical(
        &mut self,
        docs_newest_first: Vec<MessageDoc>,
        reconcile_window: Duration,
    ) -> ReplaceSummary {
        let mut seen = HashSet::new();
        let mut canonical: Vec<Message> = docs_newest_first
            .into_iter()
            .filter(|doc| seen.insert(doc.id.clone()))
            .map(Message::from_doc)
            .collect();
        canonical.reverse();

        let previously_loaded = std::mem::take(&mut self.server_ids);
        let provisional: Vec<Message> = self
            .messages
            .drain(..)
            .filter(Message::is_provisional)
            .collect();

        let mut consumed = vec![false; canonical.len()];
        let mut superseded = 0;
        let survivors: Vec<Message> = provisional
            .into_iter()
            .filter(|local| {
                if local.status == DeliveryStatus::Failed {
                    return true;
                }
                let matched = canonical.iter().enumerate().position(|(index, candidate)| {
                    !consumed[index]
                        && !candidate
                            .server_id()
                            .is_some_and(|id| previously_loaded.contains(id))
                        && candidate.is_canonical_copy_of(local, reconcile_window)
                });
                match matched {
                    Some(index) => {
                        consumed[index] = true;
                        superseded += 1;
                        false
                    }
                    None => true,
                }
            })
            .collect();

        self.server_ids = seen;
        self.messages = canonical;
        let summary = ReplaceSummary {
            canonical: self.messages.len(),
            provisional_kept: survivors.len(),
            superseded,
        };
        for local in survivors {
            self.insert_chronological(local);
        }
        summary
    }

    /// Prepends an older page (newest first) in chronological order, skipping
    /// entries already present. Returns how many were added.
    pub fn prepend_older(&mut self, docs_newest_first: Vec<MessageDoc>) -> usize {
        let mut older = Vec::with_capacity(docs_newest_first.len());
        for doc in docs_newest_first.into_iter().rev() {
            if self.server_ids.insert(doc.id.clone()) {
                older.push(Message::from_doc(doc));
            }
        }
        let added = older.len();
        self.messages.splice(0..0, older);
        added
    }

    pub fn append_provisional(&mut self, message: Message) -> Option<LocalMessageId> {
        let local_id = message.local_id()?;
        self.messages.push(message);
        Some(local_id)
    }

    pub fn promote(&mut self, local_id: LocalMessageId, canonical: Option<Message>) -> Promotion {
        let Some(index) = self.position_of_local(local_id) else {
            return self.restore_missing(canonical);
        };

        let Some(mut canonical) = canonical else {
            self.messages[index].status = DeliveryStatus::Sent;
            return Promotion::MarkedSent;
        };
        let Some(server_id) = canonical.server_id().cloned() else {
            self.messages[index].status = DeliveryStatus::Sent;
            return Promotion::MarkedSent;
        };

        if self.server_ids.contains(&server_id) {
            self.messages.remove(index);
            return Promotion::Superseded;
        }

        canonical.status = DeliveryStatus::Sent.advance(canonical.status);
        self.server_ids.insert(server_id);
        self.messages[index] = canonical;
        Promotion::Replaced
    }

    fn restore_missing(&mut self, canonical: Option<Message>) -> Promotion {
        let Some(mut canonical) = canonical else {
            return Promotion::Missing;
        };
        let Some(server_id) = canonical.server_id().cloned() else {
            return Promotion::Missing;
        };
        if !self.server_ids.insert(server_id) {
            return Promotion::Missing;
        }
        canonical.status = DeliveryStatus::Sent.advance(canonical.status);
        self.insert_chronological(canonical);
        Promotion::Restored
    }

    /// Moves a pending entry to `failed`. Entries already past `pending` are
    /// left alone.
    pub fn mark_failed(&mut self, local_id: LocalMessageId) -> bool {
        match self.position_of_local(local_id) {
            Some(index) if self.messages[index].status == DeliveryStatus::Pending => {
                self.messages[index].status = DeliveryStatus::Failed;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, local_id: LocalMessageId) -> Option<Message> {
        let index = self.position_of_local(local_id)?;
        Some(self.messages.remove(index))
    }

    /// Drops canonical entries and keeps only local ones.
    pub fn retain_provisional(&mut self) {
        self.messages.retain(Message::is_provisional);
        self.server_ids.clear();
    }

    fn position_of_local(&self, local_id: LocalMessageId) -> Option<usize> {
        self.messages
            .iter()
            .position(|message| message.local_id() == Some(local_id))
    }

    fn insert_chronological(&mut self, message: Message) {
        let index = self
            .messages
            .partition_point(|existing| existing.created_at <= message.created_at);
        self.messages.insert(index, message);
    }
}

#[cfg(test)]
#[path = "tests/transcript_tests.rs"]
mod tests;
