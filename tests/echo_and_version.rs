//! S1 (echo loopback) and S2 (version rejection) from `spec.md` §8.

mod common;

use common::{spawn_transport, KeyPair};
use sc_network_transport::error::TransportError;
use sc_network_transport::message::MessageBody;
use sc_network_transport::peer::BoundPeer;
use std::sync::Arc;
use std::time::Duration;

fn bound_peer_of(transport: &sc_network_transport::Transport) -> BoundPeer {
	BoundPeer::new(transport.local_peer().clone(), transport.local_endpoint().unwrap())
}

#[tokio::test]
async fn echo_loopback_resolves_with_pong_from_the_right_peer() {
	let _ = env_logger::try_init();
	let a = spawn_transport(&KeyPair::generate(1), 1).await;
	let b = Arc::new(spawn_transport(&KeyPair::generate(2), 1).await);

	// Only B needs its supervisor running: A reads the reply directly off
	// the one-shot dealer connection its dispatcher worker opened, never
	// through its own router.
	let b_for_run = b.clone();
	tokio::spawn(async move {
		let _ = b_for_run.run().await;
	});
	b.wait_for_running().await;

	let b_peer = bound_peer_of(&b);
	let reply = a
		.send_message_with_reply(b_peer, MessageBody::Ping, Duration::from_secs(1))
		.await
		.expect("A's ping to B should resolve with a Pong");

	assert!(matches!(reply.body, MessageBody::Pong));
	assert_eq!(reply.sender.address(), b.local_peer().address());
}

#[tokio::test]
async fn version_mismatch_is_rejected_on_the_reply_path() {
	let _ = env_logger::try_init();
	let a = spawn_transport(&KeyPair::generate(1), 2).await;
	let b = Arc::new(spawn_transport(&KeyPair::generate(2), 1).await);
	let b_for_run = b.clone();
	tokio::spawn(async move {
		let _ = b_for_run.run().await;
	});
	b.wait_for_running().await;

	let b_peer = bound_peer_of(&b);
	let result = a.send_message_with_reply(b_peer, MessageBody::Ping, Duration::from_secs(1)).await;

	match result {
		Err(TransportError::DifferentAppProtocolVersion { theirs, ours, .. }) => {
			assert_eq!(theirs, 1);
			assert_eq!(ours, 2);
		}
		other => panic!("expected DifferentAppProtocolVersion, got {:?}", other),
	}
}
