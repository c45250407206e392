//! Text messages: the per-contact outbox and inbox.
//!
//! Every contact owns one sub-table of `messages`. Locally authored messages
//! wait there until a delivery is acknowledged; the contact's
//! `first_unsent_message_id` points at the oldest one still waiting.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use murmur_shared::constants::RECORD_VERSION;
use murmur_shared::crypto;
use murmur_shared::protocol::DeliveredMessage;
use murmur_shared::types::{ContactId, GlobalId, MessageId};
use murmur_store::{tables, Key, StoreError};

use crate::contact::{Contact, Registry};
use crate::error::{CoreError, Result};
use crate::user::record_version;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextMessage {
    #[serde(skip)]
    pub id: MessageId,
    #[serde(default = "record_version")]
    pub version: u32,
    pub global_id: GlobalId,
    pub created_by_me: bool,
    #[serde(default)]
    pub is_sent: bool,
    pub creation_time: DateTime<Utc>,
    #[serde(default)]
    pub sent_time: Option<DateTime<Utc>>,
    pub text: String,
}

impl TextMessage {
    fn global_id_for(text: &str, id: MessageId) -> GlobalId {
        let mut data = Vec::with_capacity(text.len() + 8);
        data.extend_from_slice(text.as_bytes());
        data.extend_from_slice(&id.0.to_le_bytes());
        GlobalId(crypto::hash(&data))
    }

    pub fn to_delivered(&self) -> DeliveredMessage {
        DeliveredMessage {
            global_id: self.global_id,
            time: self.creation_time,
            text: self.text.clone(),
        }
    }
}

fn with_ids(entries: std::collections::BTreeMap<u64, TextMessage>) -> Vec<TextMessage> {
    entries
        .into_iter()
        .map(|(id, mut m)| {
            m.id = MessageId(id);
            m
        })
        .collect()
}

impl Registry {
    /// Queue a locally authored message for delivery.
    pub fn append_local(&self, contact: ContactId, text: &str) -> Result<TextMessage> {
        let _outbox = self.outbox.lock().unwrap_or_else(|e| e.into_inner());
        let table = self.contact(contact)?.messages_table;

        let id = MessageId(self.db().next_id(tables::MESSAGES, Some(table))?);
        let message = TextMessage {
            id,
            version: RECORD_VERSION,
            global_id: TextMessage::global_id_for(text, id),
            created_by_me: true,
            is_sent: false,
            creation_time: Utc::now(),
            sent_time: None,
            text: text.to_string(),
        };
        self.db()
            .put_json(tables::MESSAGES, Some(table), Key::Id(id.0), &message)?;

        self.update_contact(contact, |c| {
            if c.first_unsent_message_id.is_none() {
                c.first_unsent_message_id = Some(id);
            }
            Ok(())
        })?;
        debug!(contact = %contact, message = %id, "message queued");
        Ok(message)
    }

    /// Store a batch received from the peer, skipping messages whose global
    /// id is already stored (or repeated within the batch). Returns the
    /// messages actually stored.
    pub fn append_received(
        &self,
        contact: &Contact,
        batch: Vec<DeliveredMessage>,
    ) -> Result<Vec<TextMessage>> {
        let _outbox = self.outbox.lock().unwrap_or_else(|e| e.into_inner());
        let table = contact.messages_table;
        let mut known: HashSet<GlobalId> = self
            .db()
            .list_json::<TextMessage>(tables::MESSAGES, Some(table))?
            .into_values()
            .map(|m| m.global_id)
            .collect();

        let mut stored = Vec::with_capacity(batch.len());
        for incoming in batch {
            if !known.insert(incoming.global_id) {
                debug!(contact = %contact.id, "duplicate message ignored");
                continue;
            }

            let id = MessageId(self.db().next_id(tables::MESSAGES, Some(table))?);
            let message = TextMessage {
                id,
                version: RECORD_VERSION,
                global_id: incoming.global_id,
                created_by_me: false,
                is_sent: true,
                creation_time: incoming.time,
                sent_time: Some(Utc::now()),
                text: incoming.text,
            };
            self.db()
                .put_json(tables::MESSAGES, Some(table), Key::Id(id.0), &message)?;
            stored.push(message);
        }
        Ok(stored)
    }

    /// Locally authored, undelivered messages starting at the contact's
    /// first unsent one.
    pub fn pending_messages(&self, contact: &Contact) -> Result<Vec<TextMessage>> {
        let Some(first) = contact.first_unsent_message_id else {
            return Ok(Vec::new());
        };
        let entries = self
            .db()
            .list_from_json::<TextMessage>(tables::MESSAGES, Some(contact.messages_table), first.0)?;
        Ok(with_ids(entries)
            .into_iter()
            .filter(|m| m.created_by_me && !m.is_sent)
            .collect())
    }

    /// Mark `delivered` as sent and move the contact's first-unsent pointer
    /// to the oldest message still waiting (or clear it).
    pub fn mark_delivered(&self, contact: ContactId, delivered: &[MessageId]) -> Result<()> {
        let _outbox = self.outbox.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.contact(contact)?;
        let table = current.messages_table;
        let now = Utc::now();

        for id in delivered {
            let marked: Result<()> = self
                .db()
                .update(tables::MESSAGES, Some(table), Key::Id(id.0), |m: &mut TextMessage| {
                    m.is_sent = true;
                    m.sent_time = Some(now);
                    Ok(())
                });
            match marked {
                // Cleared while the delivery was in flight.
                Err(CoreError::Store(StoreError::NotFound)) => {}
                other => other?,
            }
        }

        let next = self.pending_messages(&current)?.first().map(|m| m.id);
        self.update_contact(contact, |c| {
            c.first_unsent_message_id = next;
            Ok(())
        })
    }

    /// Every message of the contact, oldest first.
    pub fn messages(&self, contact: ContactId) -> Result<Vec<TextMessage>> {
        let table = self.contact(contact)?.messages_table;
        Ok(with_ids(
            self.db().list_json::<TextMessage>(tables::MESSAGES, Some(table))?,
        ))
    }

    /// The `count` newest messages, oldest first.
    pub fn last_messages(&self, contact: ContactId, count: usize) -> Result<Vec<TextMessage>> {
        let table = self.contact(contact)?.messages_table;
        match self
            .db()
            .list_last_json::<TextMessage>(tables::MESSAGES, Some(table), count)
        {
            Ok((entries, _start)) => Ok(with_ids(entries)),
            Err(StoreError::EmptyTable) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the contact's history and reset its unsent and viewed markers.
    pub fn clear_history(&self, contact: ContactId) -> Result<()> {
        let _outbox = self.outbox.lock().unwrap_or_else(|e| e.into_inner());
        let table = self.contact(contact)?.messages_table;
        self.db().clear_table(tables::MESSAGES, Some(table))?;
        self.update_contact(contact, |c| {
            c.first_unsent_message_id = None;
            c.last_viewed_message_id = MessageId::default();
            Ok(())
        })
    }

    /// Record that the user has seen everything up to `upto`.
    pub fn mark_viewed(&self, contact: ContactId, upto: MessageId) -> Result<()> {
        self.update_contact(contact, |c| {
            c.last_viewed_message_id = c.last_viewed_message_id.max(upto);
            Ok(())
        })
    }

    /// Received messages newer than the last viewed one.
    pub fn unread_count(&self, contact: ContactId) -> Result<usize> {
        let current = self.contact(contact)?;
        let entries = self.db().list_from_json::<TextMessage>(
            tables::MESSAGES,
            Some(current.messages_table),
            current.last_viewed_message_id.0.saturating_add(1),
        )?;
        Ok(entries.values().filter(|m| !m.created_by_me).count())
    }
}
