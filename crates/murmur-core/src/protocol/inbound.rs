//! Handlers for requests arriving from peers.
//!
//! Every handler answers with a plain yes/no. Failures are logged here and
//! never reach the wire.

use async_trait::async_trait;
use tracing::{debug, info};

use murmur_net::InboundHandler;
use murmur_shared::crypto;
use murmur_shared::protocol::{
    decode_id, ConfirmKeyRequest, DeliverRequest, DeliveredMessage, IntroduceAnswer,
    IntroduceRequest, SealedBody, SessionKeyProposal,
};
use murmur_shared::types::ContactId;

use crate::contact::Introduction;
use crate::error::{CoreError, Result};
use crate::events::CoreEvent;
use crate::node::Node;

impl Node {
    fn handle_introduce(&self, request: IntroduceRequest) -> Result<ContactId> {
        if request.public_key == self.public_key() {
            return Err(CoreError::DuplicateContact);
        }

        // A repeat of an introduction we already accepted gets the same
        // answer again; the first one may have been lost.
        if let Some(existing) = self.registry().find_by_address(&request.address)? {
            let same_key = existing.public_key == Some(request.public_key);
            if same_key && crypto::secrets_equal(&existing.secret_pass, &request.shared_secret) {
                debug!(contact = %existing.id, "repeated introduction");
                return Ok(existing.id);
            }
            return Err(CoreError::DuplicateContact);
        }

        let contact = self.registry().accept_introduction(Introduction {
            address: request.address,
            public_key: request.public_key,
            hello: request.hello,
            name: request.name,
            secret: request.shared_secret,
            remote_id: request.proposed_remote_id,
        })?;
        self.events.emit(CoreEvent::ContactAdded { contact: contact.id });
        Ok(contact.id)
    }

    fn handle_confirm_key(&self, request: ConfirmKeyRequest) -> Result<()> {
        let secret = self.identity().open(&request.secret_encrypted)?;
        let remote_id = decode_id(&self.identity().open(&request.remote_id_encrypted)?)
            .ok_or_else(|| CoreError::Malformed("remote id".into()))?;

        let contact = self
            .registry()
            .find_by_secret(&secret)?
            .ok_or(CoreError::SecretMismatch)?;
        self.registry()
            .register_public_key(contact.id, request.public_key, &secret, remote_id, &request.name)?;

        let stage = self.registry().contact(contact.id)?.stage();
        info!(contact = %contact.id, "peer key received");
        self.events.emit(CoreEvent::HandshakeProgress {
            contact: contact.id,
            stage,
        });
        Ok(())
    }

    fn handle_set_session_key(&self, body: SealedBody) -> Result<()> {
        let proposal: SessionKeyProposal = serde_json::from_slice(&self.identity().open(&body.0)?)?;
        self.registry()
            .install_session_key(proposal.remote_id, &proposal.secret, proposal.session_key)?;
        debug!(contact = %proposal.remote_id, "session key installed");
        Ok(())
    }

    fn handle_deliver(&self, request: DeliverRequest) -> Result<usize> {
        let contact = self.registry().contact(request.remote_id)?;
        let session_key = contact.session_key.ok_or(CoreError::NoSessionKey)?;
        let batch: Vec<DeliveredMessage> =
            serde_json::from_slice(&crypto::decrypt(&session_key, &request.batch)?)?;

        let stored = self.registry().append_received(&contact, batch)?;
        for message in &stored {
            self.events.emit(CoreEvent::MessageReceived {
                contact: contact.id,
                message: message.id,
            });
        }
        info!(contact = %contact.id, stored = stored.len(), "messages received");
        Ok(stored.len())
    }
}

#[async_trait]
impl InboundHandler for Node {
    async fn introduce(&self, request: IntroduceRequest) -> IntroduceAnswer {
        match self.handle_introduce(request) {
            Ok(id) => IntroduceAnswer::accepted(id),
            Err(e) => {
                self.absorb("inbound introduce", None, &e);
                IntroduceAnswer::rejected()
            }
        }
    }

    async fn confirm_key(&self, request: ConfirmKeyRequest) -> bool {
        self.handle_confirm_key(request)
            .map_err(|e| self.absorb("inbound confirm-key", None, &e))
            .is_ok()
    }

    async fn set_session_key(&self, request: SealedBody) -> bool {
        self.handle_set_session_key(request)
            .map_err(|e| self.absorb("inbound set-session-key", None, &e))
            .is_ok()
    }

    async fn deliver(&self, request: DeliverRequest) -> bool {
        let contact = request.remote_id;
        self.handle_deliver(request)
            .map_err(|e| self.absorb("inbound deliver", Some(contact), &e))
            .is_ok()
    }
}
