//! S4 (bootstrap and broadcast) from `spec.md` §8.

mod common;

use common::KeyPair;
use sc_network_transport::message::MessageBody;
use sc_network_transport::peer::BoundPeer;
use sc_network_transport::Transport;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn bound_peer_of(transport: &Transport) -> BoundPeer {
	BoundPeer::new(transport.local_peer().clone(), transport.local_endpoint().unwrap())
}

async fn run_in_background(transport: &Arc<Transport>) {
	let handle = transport.clone();
	tokio::spawn(async move {
		let _ = handle.run().await;
	});
	transport.wait_for_running().await;
}

#[tokio::test]
async fn broadcast_reaches_every_known_peer_except_the_sender() {
	let _ = env_logger::try_init();
	let seed_hits = Arc::new(AtomicUsize::new(0));
	let b_hits = Arc::new(AtomicUsize::new(0));
	let a_hits = Arc::new(AtomicUsize::new(0));

	let seed = Arc::new(make_counting_transport(1, seed_hits.clone()).await);
	let a = Arc::new(make_counting_transport(2, a_hits.clone()).await);
	let b = Arc::new(make_counting_transport(3, b_hits.clone()).await);

	run_in_background(&seed).await;
	run_in_background(&a).await;
	run_in_background(&b).await;

	let seed_peer = bound_peer_of(&seed);
	let b_peer = bound_peer_of(&b);

	a.bootstrap(vec![seed_peer.clone()], Duration::from_millis(500), Duration::from_millis(500), 1)
		.await
		.expect("A should bootstrap via the seed");
	b.bootstrap(vec![seed_peer.clone()], Duration::from_millis(500), Duration::from_millis(500), 1)
		.await
		.expect("B should bootstrap via the seed");
	// Bootstrap alone only guarantees A knows the seed; make sure A's table
	// also holds B directly, mirroring how a host would register peers it
	// learns about out of band.
	a.add_peers(vec![b_peer], Duration::from_millis(500)).await;

	a.broadcast_message(vec![], MessageBody::User { kind_id: 0, payload: b"M".to_vec() });

	tokio::time::sleep(Duration::from_secs(2)).await;

	assert_eq!(seed_hits.load(Ordering::SeqCst), 1, "seed should see the broadcast exactly once");
	assert_eq!(b_hits.load(Ordering::SeqCst), 1, "B should see the broadcast exactly once");
	assert_eq!(a_hits.load(Ordering::SeqCst), 0, "A, the sender, should not see its own broadcast");
}

async fn make_counting_transport(id: u8, counter: Arc<AtomicUsize>) -> Transport {
	use sc_network_transport::config::TransportConfig;
	let keys = KeyPair::generate(id);
	let config = TransportConfig::builder()
		.host("127.0.0.1".parse().unwrap(), 0)
		.identity(Arc::new(keys.clone()), Arc::new(keys.clone()))
		.app_protocol_version(sc_network_transport::peer::AppProtocolVersion::signed(1, vec![], &keys))
		.process_message_handler(Arc::new(move |_message| {
			counter.fetch_add(1, Ordering::SeqCst);
		}))
		.build()
		.expect("valid config");
	let transport = Transport::new(config);
	transport.start().await.expect("start should succeed on an ephemeral port");
	transport
}
