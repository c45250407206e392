#![allow(dead_code)]

use std::sync::Arc;

use murmur_core::{BroadcastSink, Node, User};
use murmur_net::{build_router, InboundHandler, LoopbackTransport, RateLimiter, Transport};
use murmur_shared::types::PeerAddress;
use murmur_store::Database;

pub struct Peer {
    pub node: Arc<Node>,
    pub events: BroadcastSink,
    pub address: PeerAddress,
    _dir: tempfile::TempDir,
}

/// A node with its own store, an identity named `name`, reachable as
/// `address` through `transport`.
pub fn peer(name: &str, address: &str, transport: Arc<dyn Transport>) -> Peer {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_at(&dir.path().join(format!("{name}.db"))).unwrap();
    db.set_pass(&format!("{name}-password")).unwrap();
    User::create(&db, name).unwrap();

    let events = BroadcastSink::default();
    let node = Node::new(Arc::new(db), transport, Arc::new(events.clone())).unwrap();
    let address = PeerAddress::parse(address).unwrap();
    node.set_own_address(address.clone()).unwrap();

    Peer {
        node,
        events,
        address,
        _dir: dir,
    }
}

/// Two nodes wired together in-process.
pub fn loopback_pair() -> (Arc<LoopbackTransport>, Peer, Peer) {
    let transport = Arc::new(LoopbackTransport::new());
    let alice = peer("alice", "alice.onion", transport.clone());
    let bob = peer("bob", "bob.onion", transport.clone());
    for p in [&alice, &bob] {
        let handler: Arc<dyn InboundHandler> = p.node.clone();
        transport.attach(p.address.clone(), build_router(handler, RateLimiter::default()));
    }
    (transport, alice, bob)
}

/// Run the link handshake: `from` adds `to`, introduces itself, and `to`
/// confirms its key. Returns (contact id at `from`, contact id at `to`).
pub async fn connect(from: &Peer, to: &Peer) -> (murmur_shared::types::ContactId, murmur_shared::types::ContactId) {
    let at_from = from.node.add_contact(to.address.as_str(), "hello").unwrap();
    from.node.introduce(at_from.id).await.unwrap();

    let at_to = to
        .node
        .registry()
        .find_by_address(&from.address)
        .unwrap()
        .expect("introduction accepted");
    to.node.confirm_public_key(at_to.id).await.unwrap();
    (at_from.id, at_to.id)
}
