//! S6 (cancellation) from `spec.md` §8: the only cancellation lever the
//! public surface exposes is the root token `Transport::stop` cancels.

mod common;

use common::KeyPair;
use sc_network_transport::config::TransportConfig;
use sc_network_transport::error::TransportError;
use sc_network_transport::message::MessageBody;
use sc_network_transport::peer::{AppProtocolVersion, BoundPeer, Peer, PublicKey};
use sc_network_transport::Transport;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn stop_cancels_an_in_flight_call_promptly() {
	let _ = env_logger::try_init();
	let keys = KeyPair::generate(1);
	let config = TransportConfig::builder()
		.host("127.0.0.1".parse().unwrap(), 0)
		.identity(Arc::new(keys.clone()), Arc::new(keys.clone()))
		.app_protocol_version(AppProtocolVersion::signed(1, vec![], &keys))
		.build()
		.unwrap();
	let transport = Arc::new(Transport::new(config));
	transport.start().await.unwrap();

	// A peer nobody is listening on: `connect_one_shot` hangs until the OS
	// gives up or the call is cancelled first.
	let unreachable_key = PublicKey(vec![9]);
	let version = AppProtocolVersion::signed(1, vec![], &KeyPair::generate(9));
	let peer = Peer::new(unreachable_key, version, None);
	let unreachable = BoundPeer::new(peer, "127.0.0.1:1".parse().unwrap());

	let call_transport = transport.clone();
	let call = tokio::spawn(async move {
		let started = Instant::now();
		let result = call_transport
			.send_message_with_reply(unreachable, MessageBody::Ping, Duration::from_secs(10))
			.await;
		(started.elapsed(), result)
	});

	tokio::time::sleep(Duration::from_millis(50)).await;
	transport.stop(Duration::from_millis(0)).await;

	let (elapsed, result) = call.await.unwrap();
	assert!(elapsed < Duration::from_millis(200), "cancellation took too long: {:?}", elapsed);
	assert!(matches!(result, Err(TransportError::Cancelled)), "expected Cancelled, got {:?}", result);
}
