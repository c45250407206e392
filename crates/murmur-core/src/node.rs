//! The [`Node`]: one running installation.
//!
//! Bundles the registry, the local identity, the transport and the event
//! sink. Front ends call its public operations; the scheduler and the
//! inbound listener drive the protocol through it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use murmur_net::Transport;
use murmur_shared::identity::Identity;
use murmur_shared::types::{ContactId, MessageId, PeerAddress, PeerKey};
use murmur_store::Database;

use crate::contact::{Contact, Registry, Stage};
use crate::error::{CoreError, Result};
use crate::events::{CoreEvent, EventSink};
use crate::message::TextMessage;
use crate::user::{self, User};

/// Poll interval while waiting for a contact to become idle.
const IDLE_POLL: Duration = Duration::from_millis(100);
/// Give up waiting for a busy contact after this long.
const IDLE_WAIT: Duration = Duration::from_secs(40);

pub struct Node {
    registry: Registry,
    name: String,
    identity: Identity,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) events: Arc<dyn EventSink>,
    own_address: RwLock<Option<PeerAddress>>,
    in_flight: Mutex<HashSet<ContactId>>,
}

/// Marks a contact as being worked on until dropped.
pub struct Claim {
    node: Arc<Node>,
    id: ContactId,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.node
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactSummary {
    pub id: ContactId,
    pub name: String,
    pub address: PeerAddress,
    pub stage: Stage,
    pub unread: usize,
    pub pending: bool,
    pub in_work: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub name: String,
    pub public_key: String,
    pub own_address: Option<PeerAddress>,
    pub in_flight: usize,
    pub contacts: Vec<ContactSummary>,
}

impl Node {
    /// Build a node over an unlocked store that already holds a user.
    pub fn new(
        db: Arc<Database>,
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>> {
        let user = User::load(&db)?;
        let identity = user.identity()?;
        let own_address = user::load_own_address(&db)?;

        info!(
            name = %user.name,
            key = %identity.public_key().short(),
            address = ?own_address.as_ref().map(|a| a.short()),
            "node ready"
        );

        Ok(Arc::new(Self {
            registry: Registry::new(db),
            name: user.name,
            identity,
            transport,
            events,
            own_address: RwLock::new(own_address),
            in_flight: Mutex::new(HashSet::new()),
        }))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> PeerKey {
        self.identity.public_key()
    }

    pub(crate) fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn own_address(&self) -> Option<PeerAddress> {
        self.own_address
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Record the address the onion service publishes us under.
    pub fn set_own_address(&self, address: PeerAddress) -> Result<()> {
        user::save_own_address(self.registry.db(), &address)?;
        info!(address = %address.short(), "own address set");
        *self.own_address.write().unwrap_or_else(|e| e.into_inner()) = Some(address);
        Ok(())
    }

    // ------------------------------------------------------------------
    // In-flight tracking
    // ------------------------------------------------------------------

    /// Claim `id` for one unit of work; `None` if it is already claimed.
    pub fn try_claim(self: &Arc<Self>, id: ContactId) -> Option<Claim> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
        inserted.then(|| Claim {
            node: Arc::clone(self),
            id,
        })
    }

    pub fn is_claimed(&self, id: ContactId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    // ------------------------------------------------------------------
    // Front-end operations
    // ------------------------------------------------------------------

    /// Add a contact from a pasted link; the scheduler introduces us.
    pub fn add_contact(&self, link: &str, hello: &str) -> Result<Contact> {
        let address = PeerAddress::parse(link)?;
        if self.own_address().as_ref() == Some(&address) {
            return Err(CoreError::DuplicateContact);
        }
        let contact = self.registry.create_from_link(address, hello)?;
        self.events.emit(CoreEvent::ContactAdded { contact: contact.id });
        Ok(contact)
    }

    /// Queue a text made of `lines` joined by newlines.
    pub fn send_text<S: AsRef<str>>(&self, contact: ContactId, lines: &[S]) -> Result<TextMessage> {
        let text = lines
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            return Err(CoreError::EmptyMessage);
        }
        self.registry.append_local(contact, &text)
    }

    pub fn contacts(&self) -> Result<Vec<Contact>> {
        self.registry.contacts()
    }

    pub fn last_messages(&self, contact: ContactId, count: usize) -> Result<Vec<TextMessage>> {
        self.registry.last_messages(contact, count)
    }

    pub fn mark_viewed(&self, contact: ContactId, upto: MessageId) -> Result<()> {
        self.registry.mark_viewed(contact, upto)
    }

    pub fn unread_count(&self, contact: ContactId) -> Result<usize> {
        self.registry.unread_count(contact)
    }

    /// Wait until no delivery is running for `contact`, then drop its
    /// history.
    pub async fn clear_messages(&self, contact: ContactId) -> Result<()> {
        let deadline = tokio::time::Instant::now() + IDLE_WAIT;
        loop {
            let busy = self.is_claimed(contact) || self.registry.contact(contact)?.in_work();
            if !busy {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoreError::Busy(contact));
            }
            tokio::time::sleep(IDLE_POLL).await;
        }

        self.registry.clear_history(contact)?;
        self.events.emit(CoreEvent::HistoryCleared { contact });
        info!(contact = %contact, "history cleared");
        Ok(())
    }

    pub fn status(&self) -> Result<Status> {
        let contacts = self
            .registry
            .contacts()?
            .into_iter()
            .map(|c| {
                Ok(ContactSummary {
                    id: c.id,
                    name: c.display_name(),
                    unread: self.registry.unread_count(c.id)?,
                    stage: c.stage(),
                    pending: c.has_pending(),
                    in_work: c.in_work() || self.is_claimed(c.id),
                    address: c.address,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Status {
            name: self.name.clone(),
            public_key: self.public_key().short(),
            own_address: self.own_address(),
            in_flight: self.in_flight_count(),
            contacts,
        })
    }

    /// Log an absorbed failure; corruption also goes to the front end.
    pub(crate) fn absorb(&self, context: &'static str, contact: Option<ContactId>, err: &CoreError) {
        if err.is_corruption() {
            warn!(context, contact = ?contact, error = %err, "storage corruption");
            self.events.emit(CoreEvent::Error {
                message: format!("{context}: {err}"),
            });
        } else {
            warn!(context, contact = ?contact, error = %err, "step failed");
        }
    }
}
