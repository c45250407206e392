//! Outbound handshake steps and message delivery.
//!
//! Each step re-reads the contact right before talking to the peer and
//! writes the outcome back through [`Registry::update_contact`], so state
//! changed by inbound requests in the meantime is never lost.
//!
//! [`Registry::update_contact`]: crate::contact::Registry::update_contact

use chrono::Utc;
use tracing::{debug, info};

use murmur_net::call;
use murmur_shared::crypto;
use murmur_shared::protocol::{
    encode_id, paths, ConfirmKeyRequest, DeliverRequest, DeliveredMessage, IntroduceAnswer,
    IntroduceRequest, SealedBody, SessionKeyProposal,
};
use murmur_shared::types::ContactId;

use crate::error::{CoreError, Result};
use crate::events::CoreEvent;
use crate::node::Node;

/// Most messages sent in one delivery.
pub const MAX_BATCH: usize = 100;

impl Node {
    /// Stage 1: present ourselves to a contact created from a link.
    pub async fn introduce(&self, id: ContactId) -> Result<()> {
        let contact = self.registry().contact(id)?;
        if contact.pub_key_sent {
            return Ok(());
        }
        let own_address = self.own_address().ok_or(CoreError::OwnAddressUnknown)?;
        self.registry().stamp_try(id)?;

        let request = IntroduceRequest {
            name: self.name().to_string(),
            hello: contact.hello_message.clone(),
            address: own_address,
            shared_secret: contact.secret_pass.to_vec(),
            public_key: self.public_key(),
            proposed_remote_id: id,
        };
        let answer: IntroduceAnswer =
            call(&*self.transport, &contact.address, paths::INTRODUCE, &request).await?;

        let assigned = match answer {
            IntroduceAnswer {
                accepted: true,
                assigned_remote_id: Some(assigned),
            } => assigned,
            _ => return Err(CoreError::RejectedByPeer("introduction")),
        };

        let stage = self.registry().update_contact(id, |c| {
            c.remote_id = Some(assigned);
            c.pub_key_sent = true;
            Ok(c.stage())
        })?;
        info!(contact = %id, remote = %assigned, "introduction accepted by peer");
        self.events.emit(CoreEvent::HandshakeProgress { contact: id, stage });
        Ok(())
    }

    /// Stage 2: prove we hold the shared secret and hand over our key.
    /// A no-op once the peer has acknowledged it.
    pub async fn confirm_public_key(&self, id: ContactId) -> Result<()> {
        let contact = self.registry().contact(id)?;
        if contact.pub_key_sent {
            return Ok(());
        }
        let peer_key = contact.public_key.ok_or(CoreError::PeerKeyUnknown)?;
        self.registry().stamp_try(id)?;

        let request = ConfirmKeyRequest {
            name: self.name().to_string(),
            remote_id_encrypted: crypto::seal(&peer_key.0, &encode_id(id))?,
            secret_encrypted: crypto::seal(&peer_key.0, &contact.secret_pass)?,
            public_key: self.public_key(),
        };
        let accepted: bool =
            call(&*self.transport, &contact.address, paths::CONFIRM_KEY, &request).await?;
        if !accepted {
            return Err(CoreError::RejectedByPeer("key confirmation"));
        }

        let stage = self.registry().update_contact(id, |c| {
            c.pub_key_sent = true;
            Ok(c.stage())
        })?;
        info!(contact = %id, "public key confirmed by peer");
        self.events.emit(CoreEvent::HandshakeProgress { contact: id, stage });
        Ok(())
    }

    /// Stage 3: seal the current session key to the peer.
    pub async fn propagate_session_key(&self, id: ContactId) -> Result<()> {
        let contact = self.registry().contact(id)?;
        let peer_key = contact.public_key.ok_or(CoreError::PeerKeyUnknown)?;
        let remote_id = contact.remote_id.ok_or(CoreError::RemoteIdUnknown)?;
        let session_key = contact.session_key.ok_or(CoreError::NoSessionKey)?;

        let proposal = SessionKeyProposal {
            remote_id,
            secret: contact.secret_pass.to_vec(),
            session_key,
        };
        let body = SealedBody(crypto::seal(&peer_key.0, &serde_json::to_vec(&proposal)?)?);
        let accepted: bool =
            call(&*self.transport, &contact.address, paths::SET_SESSION_KEY, &body).await?;
        if !accepted {
            return Err(CoreError::RejectedByPeer("session key"));
        }
        debug!(contact = %id, "session key propagated");
        Ok(())
    }

    /// Stage 4: send every queued message. Returns how many were delivered.
    ///
    /// Confirms the key and negotiates a session key first when needed. The
    /// contact is marked in work for the duration; the try time is stamped
    /// whatever the outcome.
    pub async fn deliver_pending(&self, id: ContactId) -> Result<usize> {
        if !self.registry().contact(id)?.has_pending() {
            return Ok(0);
        }

        self.registry().set_in_work(id, true)?;
        let result = self.deliver_batch(id).await;

        let finished = self.registry().update_contact(id, |c| {
            c.in_work_since = None;
            c.last_try_time = Some(Utc::now());
            Ok(())
        });
        if let Err(e) = finished {
            self.absorb("finishing delivery", Some(id), &e);
        }
        result
    }

    async fn deliver_batch(&self, id: ContactId) -> Result<usize> {
        self.confirm_public_key(id).await?;

        if self.registry().ensure_session_key(id, Utc::now())? {
            if let Err(e) = self.propagate_session_key(id).await {
                self.registry().clear_session_key(id)?;
                return Err(e);
            }
        }

        let contact = self.registry().contact(id)?;
        let remote_id = contact.remote_id.ok_or(CoreError::RemoteIdUnknown)?;
        let session_key = contact.session_key.ok_or(CoreError::NoSessionKey)?;

        let mut pending = self.registry().pending_messages(&contact)?;
        pending.truncate(MAX_BATCH);
        if pending.is_empty() {
            return Ok(0);
        }

        let batch: Vec<DeliveredMessage> = pending.iter().map(|m| m.to_delivered()).collect();
        let request = DeliverRequest {
            remote_id,
            batch: crypto::encrypt(&session_key, &serde_json::to_vec(&batch)?)?,
        };
        let accepted: bool =
            call(&*self.transport, &contact.address, paths::DELIVER, &request).await?;
        if !accepted {
            // The peer holds another key; renegotiate next time.
            self.registry().clear_session_key(id)?;
            return Err(CoreError::RejectedByPeer("delivery"));
        }

        let ids: Vec<_> = pending.iter().map(|m| m.id).collect();
        self.registry().mark_delivered(id, &ids)?;
        info!(contact = %id, count = ids.len(), "messages delivered");
        self.events.emit(CoreEvent::MessagesDelivered {
            contact: id,
            count: ids.len(),
        });
        Ok(ids.len())
    }
}
