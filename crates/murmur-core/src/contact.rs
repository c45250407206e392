//! Contacts and the registry that owns them.
//!
//! A contact is created either from a link the user pasted
//! ([`Registry::create_from_link`]) or from a peer's introduction
//! ([`Registry::accept_introduction`]). Every later mutation goes through
//! [`Registry::update_contact`], which runs inside one store transaction so
//! that concurrent inbound and outbound steps never overwrite each other.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use murmur_shared::constants::{
    HELLO_MAX_LEN, NAME_MAX_LEN, RECORD_VERSION, RETRY_COOLDOWN_SECS, SECRET_SIZE,
    SESSION_KEY_LIFETIME_SECS,
};
use murmur_shared::crypto::{self, SymmetricKey};
use murmur_shared::types::{ContactId, MessageId, PeerAddress, PeerKey};
use murmur_store::{tables, Database, Key, StoreError};

use crate::error::{CoreError, Result};
use crate::user::record_version;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Storage position; not part of the record.
    #[serde(skip)]
    pub id: ContactId,
    #[serde(default = "record_version")]
    pub version: u32,
    #[serde(with = "murmur_shared::encoding::array32")]
    pub secret_pass: [u8; 32],
    #[serde(default, with = "murmur_shared::encoding::option_array32")]
    pub session_key: Option<SymmetricKey>,
    #[serde(default)]
    pub session_key_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub in_work_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remote_id: Option<ContactId>,
    pub address: PeerAddress,
    pub messages_table: u64,
    #[serde(default)]
    pub reported_name: String,
    #[serde(default)]
    pub public_key: Option<PeerKey>,
    #[serde(default)]
    pub hello_message: String,
    #[serde(default)]
    pub pub_key_sent: bool,
    pub created_by_me: bool,
    #[serde(default)]
    pub last_call_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_try_time: Option<DateTime<Utc>>,
    pub creation_time: DateTime<Utc>,
    #[serde(default)]
    pub first_unsent_message_id: Option<MessageId>,
    /// `MessageId(0)` when nothing was viewed yet.
    #[serde(default)]
    pub last_viewed_message_id: MessageId,
}

/// Handshake progress, derived from the contact's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Created from a link; the peer has not heard from us.
    Unintroduced,
    /// One side's key is known to the other, not both yet.
    AwaitingKeyConfirmation,
    /// Keys exchanged both ways; no session key yet.
    KeyConfirmed,
    /// A session key is installed and nothing is waiting to go out.
    SessionEstablished,
    /// A session key is installed and messages are queued.
    Delivering,
}

impl Contact {
    pub fn stage(&self) -> Stage {
        match (self.pub_key_sent, self.public_key.is_some()) {
            (false, false) => Stage::Unintroduced,
            (true, true) => match (self.session_key.is_some(), self.first_unsent_message_id.is_some()) {
                (false, _) => Stage::KeyConfirmed,
                (true, false) => Stage::SessionEstablished,
                (true, true) => Stage::Delivering,
            },
            _ => Stage::AwaitingKeyConfirmation,
        }
    }

    pub fn in_work(&self) -> bool {
        self.in_work_since.is_some()
    }

    /// The session key, if one is installed and younger than its lifetime.
    pub fn valid_session_key(&self, now: DateTime<Utc>) -> Option<SymmetricKey> {
        let key = self.session_key?;
        let born = self.session_key_time?;
        (now - born <= Duration::seconds(SESSION_KEY_LIFETIME_SECS)).then_some(key)
    }

    /// Whether enough time passed since the last outbound attempt.
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_try_time {
            Some(t) => now - t >= Duration::seconds(RETRY_COOLDOWN_SECS),
            None => true,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.first_unsent_message_id.is_some()
    }

    /// Display name: what the peer calls itself, else a short address.
    pub fn display_name(&self) -> String {
        if self.reported_name.is_empty() {
            self.address.short()
        } else {
            self.reported_name.clone()
        }
    }
}

/// Data presented by a peer that introduces itself.
#[derive(Debug, Clone)]
pub struct Introduction {
    pub address: PeerAddress,
    pub public_key: PeerKey,
    pub hello: String,
    pub name: String,
    pub secret: Vec<u8>,
    pub remote_id: ContactId,
}

/// Durable contact and message state over the encrypted store.
pub struct Registry {
    db: Arc<Database>,
    /// Serializes duplicate checks with the inserts they guard.
    creation: Mutex<()>,
    /// Serializes outbox bookkeeping (append vs. mark-delivered).
    pub(crate) outbox: Mutex<()>,
}

impl Registry {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            creation: Mutex::new(()),
            outbox: Mutex::new(()),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn contact(&self, id: ContactId) -> Result<Contact> {
        match self.db.get_json::<Contact>(tables::CONTACTS, None, Key::Id(id.0)) {
            Ok(mut contact) => {
                contact.id = id;
                Ok(contact)
            }
            Err(StoreError::NotFound) => Err(CoreError::ContactNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// All contacts in id order.
    pub fn contacts(&self) -> Result<Vec<Contact>> {
        let all = self.db.list_json::<Contact>(tables::CONTACTS, None)?;
        Ok(all
            .into_iter()
            .map(|(id, mut c)| {
                c.id = ContactId(id);
                c
            })
            .collect())
    }

    pub fn find_by_address(&self, address: &PeerAddress) -> Result<Option<Contact>> {
        Ok(self.contacts()?.into_iter().find(|c| &c.address == address))
    }

    /// Locate the contact holding `secret`. Every candidate is compared in
    /// constant time.
    pub fn find_by_secret(&self, secret: &[u8]) -> Result<Option<Contact>> {
        let mut found = None;
        for contact in self.contacts()? {
            if crypto::secrets_equal(&contact.secret_pass, secret) {
                found = Some(contact);
            }
        }
        Ok(found)
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Add a contact from a pasted link. The shared secret is derived from
    /// the greeting, the address and the current time.
    pub fn create_from_link(&self, address: PeerAddress, hello: &str) -> Result<Contact> {
        let _guard = self.creation.lock().unwrap_or_else(|e| e.into_inner());
        if self.find_by_address(&address)?.is_some() {
            return Err(CoreError::DuplicateContact);
        }

        let now = Utc::now();
        let mut seed = Vec::with_capacity(hello.len() + address.as_str().len() + 8);
        seed.extend_from_slice(hello.as_bytes());
        seed.extend_from_slice(address.as_str().as_bytes());
        seed.extend_from_slice(&now.timestamp().to_le_bytes());

        let contact = self.insert(Contact {
            id: ContactId::default(),
            version: RECORD_VERSION,
            secret_pass: crypto::hash(&seed),
            session_key: None,
            session_key_time: None,
            in_work_since: None,
            remote_id: None,
            address,
            messages_table: 0,
            reported_name: String::new(),
            public_key: None,
            hello_message: hello.to_string(),
            pub_key_sent: false,
            created_by_me: true,
            last_call_time: None,
            last_try_time: None,
            creation_time: now,
            first_unsent_message_id: None,
            last_viewed_message_id: MessageId::default(),
        })?;
        info!(contact = %contact.id, peer = %contact.address.short(), "contact created from link");
        Ok(contact)
    }

    /// Record a peer that introduced itself. Rejected when the address or
    /// the public key is already known.
    pub fn accept_introduction(&self, intro: Introduction) -> Result<Contact> {
        check_len("name", &intro.name, NAME_MAX_LEN)?;
        check_len("hello", &intro.hello, HELLO_MAX_LEN)?;
        let secret: [u8; SECRET_SIZE] = intro
            .secret
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::Malformed(format!("shared secret must be {SECRET_SIZE} bytes")))?;

        let _guard = self.creation.lock().unwrap_or_else(|e| e.into_inner());
        let duplicate = self
            .contacts()?
            .iter()
            .any(|c| c.address == intro.address || c.public_key == Some(intro.public_key));
        if duplicate {
            return Err(CoreError::DuplicateContact);
        }

        let contact = self.insert(Contact {
            id: ContactId::default(),
            version: RECORD_VERSION,
            secret_pass: secret,
            session_key: None,
            session_key_time: None,
            in_work_since: None,
            remote_id: Some(intro.remote_id),
            address: intro.address,
            messages_table: 0,
            reported_name: intro.name,
            public_key: Some(intro.public_key),
            hello_message: intro.hello,
            pub_key_sent: false,
            created_by_me: false,
            last_call_time: None,
            last_try_time: None,
            creation_time: Utc::now(),
            first_unsent_message_id: None,
            last_viewed_message_id: MessageId::default(),
        })?;
        info!(contact = %contact.id, peer = %contact.address.short(), "introduction accepted");
        Ok(contact)
    }

    fn insert(&self, mut contact: Contact) -> Result<Contact> {
        contact.id = ContactId(self.db.next_id(tables::CONTACTS, None)?);
        contact.messages_table = self.db.next_id(tables::MESSAGES, None)?;
        self.db.create_table(tables::MESSAGES, Some(contact.messages_table))?;
        self.db
            .put_json(tables::CONTACTS, None, Key::Id(contact.id.0), &contact)?;
        Ok(contact)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Apply `f` to the stored contact atomically and return its result.
    /// Nothing is written when `f` fails.
    pub fn update_contact<R>(
        &self,
        id: ContactId,
        f: impl FnOnce(&mut Contact) -> Result<R>,
    ) -> Result<R> {
        let result = self
            .db
            .update(tables::CONTACTS, None, Key::Id(id.0), |contact: &mut Contact| {
                contact.id = id;
                f(contact)
            });
        match result {
            Err(CoreError::Store(StoreError::NotFound)) => Err(CoreError::ContactNotFound(id)),
            other => other,
        }
    }

    /// Store the peer's public key after checking the shared secret.
    ///
    /// Presenting the key already on file again is accepted; a different key
    /// is refused. A remote id is adopted when none is known and must match
    /// otherwise.
    pub fn register_public_key(
        &self,
        id: ContactId,
        public_key: PeerKey,
        secret: &[u8],
        remote_id: ContactId,
        name: &str,
    ) -> Result<()> {
        check_len("name", name, NAME_MAX_LEN)?;
        self.update_contact(id, |c| {
            if !crypto::secrets_equal(&c.secret_pass, secret) {
                return Err(CoreError::SecretMismatch);
            }
            match c.public_key {
                Some(known) if known != public_key => return Err(CoreError::AlreadyKnown),
                _ => {}
            }
            match c.remote_id {
                Some(known) if known != remote_id => return Err(CoreError::AlreadyKnown),
                _ => {}
            }
            c.public_key = Some(public_key);
            c.remote_id = Some(remote_id);
            if !name.is_empty() {
                c.reported_name = name.to_string();
            }
            Ok(())
        })?;
        debug!(contact = %id, "peer public key registered");
        Ok(())
    }

    /// Install a session key proposed by the peer.
    pub fn install_session_key(&self, id: ContactId, secret: &[u8], key: SymmetricKey) -> Result<()> {
        self.update_contact(id, |c| {
            if !crypto::secrets_equal(&c.secret_pass, secret) {
                return Err(CoreError::SecretMismatch);
            }
            c.session_key = Some(key);
            c.session_key_time = Some(Utc::now());
            Ok(())
        })
    }

    /// Regenerate the session key iff it is absent or expired. Returns whether
    /// a new key was generated.
    pub fn ensure_session_key(&self, id: ContactId, now: DateTime<Utc>) -> Result<bool> {
        self.update_contact(id, |c| {
            if c.valid_session_key(now).is_some() {
                return Ok(false);
            }
            c.session_key = Some(crypto::generate_session_key());
            c.session_key_time = Some(now);
            Ok(true)
        })
    }

    /// Drop the session key so the next delivery negotiates a fresh one.
    pub fn clear_session_key(&self, id: ContactId) -> Result<()> {
        self.update_contact(id, |c| {
            c.session_key = None;
            c.session_key_time = None;
            Ok(())
        })
    }

    pub fn set_in_work(&self, id: ContactId, in_work: bool) -> Result<()> {
        self.update_contact(id, |c| {
            c.in_work_since = in_work.then(Utc::now);
            Ok(())
        })
    }

    /// Clear every durable in-work marker; they only survive a crash.
    pub fn clear_all_in_work(&self) -> Result<usize> {
        let mut cleared = 0;
        for contact in self.contacts()? {
            if contact.in_work() {
                self.set_in_work(contact.id, false)?;
                cleared += 1;
            }
        }
        if cleared > 0 {
            info!(cleared, "stale in-work markers cleared");
        }
        Ok(cleared)
    }

    pub fn stamp_try(&self, id: ContactId) -> Result<()> {
        self.update_contact(id, |c| {
            c.last_try_time = Some(Utc::now());
            Ok(())
        })
    }
}

/// Peer-supplied text longer than `max` characters is refused.
fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len > max {
        return Err(CoreError::Malformed(format!("{field} is {len} characters, limit {max}")));
    }
    Ok(())
}
