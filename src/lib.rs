// This file is part of Substrate.

// Copyright (C) 2021 Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! A peer-to-peer message transport: signed, versioned messages routed
//! over a Kademlia DHT, with an optional TURN/ICE relay path for peers
//! behind NAT.
//!
//! The public entry point is [`Transport`], built from a [`TransportConfig`]
//! and driven through `start` -> `run` -> `stop`.

pub mod cancel;
pub mod codec;
pub mod config;
pub mod dealer;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod history;
pub mod kademlia;
pub mod message;
pub mod metrics;
pub mod peer;
pub mod queues;
pub mod router;
pub mod supervisor;
pub mod turn;
pub mod wire;

#[cfg(test)]
pub mod test_support;

use cancel::CancellationToken;
use config::TransportConfig;
use dealer::DealerPool;
use dispatcher::{Dispatcher, WorkerContext};
use error::{Result, TransportError};
use gate::VersionGate;
use history::MessageHistory;
use kademlia::{KademliaProtocol, Messenger};
use message::{Message, MessageBody};
use metrics::{Counters, Metrics};
use peer::{BoundPeer, Peer, PeerAddress, VersionPolicy};
use queues::{BroadcastQueue, ReplyQueue};
use router::RouterSocket;
use std::sync::Arc;
use std::time::Duration;
use supervisor::{LifecycleSupervisor, SupervisorContext};
use turn::client::TurnClient;
use turn::permission::PermissionTable;

const LOG_TARGET: &str = "sc-transport";

struct MessengerInner {
	dispatcher: Arc<Dispatcher>,
	broadcast_queue: BroadcastQueue,
	reply_queue: ReplyQueue,
	local: BoundPeer,
}

/// The [`Messenger`] capability `KademliaProtocol` is built against,
/// installed once `Transport::start` has bound the router socket and spun
/// up the dispatcher. Calls made before `start` fail with
/// [`TransportError::NoSwarmContext`] rather than panicking, since a host
/// may reasonably construct a `Transport` well before calling `start`.
struct TransportMessenger {
	inner: parking_lot::Mutex<Option<MessengerInner>>,
}

impl TransportMessenger {
	fn new() -> Self {
		TransportMessenger { inner: parking_lot::Mutex::new(None) }
	}

	fn install(&self, inner: MessengerInner) {
		*self.inner.lock() = Some(inner);
	}
}

#[async_trait::async_trait]
impl Messenger for TransportMessenger {
	async fn send_with_reply(
		&self,
		peer: BoundPeer,
		body: MessageBody,
		timeout: Duration,
		expected_responses: usize,
		cancel: CancellationToken,
	) -> Result<Vec<Message>> {
		let dispatcher = self.inner.lock().as_ref().map(|i| i.dispatcher.clone()).ok_or(TransportError::NoSwarmContext)?;
		dispatcher.send_with_reply(peer, body, timeout, expected_responses, cancel).await
	}

	async fn broadcast(&self, except: Vec<PeerAddress>, body: MessageBody) {
		if let Some(queue) = self.inner.lock().as_ref().map(|i| i.broadcast_queue.clone()) {
			queue.broadcast(except, body);
		}
	}

	fn reply(&self, identity: Vec<u8>, body: MessageBody) -> Result<()> {
		let queue = self.inner.lock().as_ref().map(|i| i.reply_queue.clone()).ok_or(TransportError::NoSwarmContext)?;
		queue.reply(identity, body);
		Ok(())
	}

	fn local_peer(&self) -> BoundPeer {
		self.inner
			.lock()
			.as_ref()
			.map(|i| i.local.clone())
			.expect("local_peer() called before Transport::start()")
	}
}

/// The transport's runtime handles, populated by [`Transport::start`] and
/// torn down by [`Transport::dispose`].
struct Runtime {
	router: Arc<RouterSocket>,
	dispatcher: Arc<Dispatcher>,
	broadcast_queue: BroadcastQueue,
	#[allow(dead_code)]
	reply_queue: ReplyQueue,
	local: BoundPeer,
}

/// The peer-to-peer message transport (`spec.md` §6 external interfaces).
pub struct Transport {
	config: TransportConfig,
	local_peer: Peer,
	kademlia: Arc<KademliaProtocol>,
	messenger: Arc<TransportMessenger>,
	history: Arc<MessageHistory>,
	dealers: DealerPool,
	gate: Arc<VersionGate>,
	turn: Option<Arc<TurnClient>>,
	permissions: Arc<PermissionTable>,
	supervisor: LifecycleSupervisor,
	runtime: parking_lot::Mutex<Option<Runtime>>,
	counters: Arc<Counters>,
}

impl Transport {
	/// Build a transport from a validated configuration. No network I/O
	/// happens until [`Transport::start`].
	pub fn new(config: TransportConfig) -> Self {
		let local_peer = Peer::new(config.signer.public_key(), config.app_protocol_version.clone(), config.host);
		let policy = VersionPolicy::new(config.app_protocol_version.clone(), config.trusted_signers.clone());
		let gate = Arc::new(VersionGate::new(policy, config.on_different_version.clone()));

		let messenger = Arc::new(TransportMessenger::new());
		let kademlia =
			Arc::new(KademliaProtocol::new(local_peer.address(), config.table_size, config.bucket_size, messenger.clone()));
		let turn = config.turn.clone().map(|turn_config| Arc::new(TurnClient::new(turn_config)));

		Transport {
			supervisor: LifecycleSupervisor::new(local_peer.clone()),
			local_peer,
			kademlia,
			messenger,
			history: Arc::new(MessageHistory::default()),
			dealers: DealerPool::new(dealer::DEFAULT_SEND_TIMEOUT),
			gate,
			turn,
			permissions: Arc::new(PermissionTable::new()),
			runtime: parking_lot::Mutex::new(None),
			counters: Arc::new(Counters::default()),
			config,
		}
	}

	/// This node's own (not-yet-bound) peer identity.
	pub fn local_peer(&self) -> &Peer {
		&self.local_peer
	}

	/// The endpoint the router actually bound to, once [`Transport::start`]
	/// has run. Needed by callers that passed `listen_port: 0` and must
	/// learn the ephemeral port before advertising themselves to peers.
	pub fn local_endpoint(&self) -> Option<std::net::SocketAddr> {
		self.runtime.lock().as_ref().map(|r| r.local.endpoint())
	}

	/// `start(cancel)` (`spec.md` §4.H): binds the router socket, wires the
	/// dispatcher/broadcast/reply plumbing, and installs them into the
	/// Kademlia protocol's `Messenger`.
	pub async fn start(&self) -> Result<()> {
		self.supervisor.start()?;

		let host = self.config.host.unwrap_or_else(|| "0.0.0.0".parse().unwrap());
		let (router, listener) = RouterSocket::bind(host, self.config.listen_port).await?;
		let router = Arc::new(router);
		tokio::spawn(router.clone().accept_loop(listener));

		let local_endpoint = router.local_addr();
		let local = BoundPeer::new(self.local_peer.clone(), local_endpoint);

		let worker_ctx = WorkerContext {
			local: local.clone(),
			signer: self.config.signer.clone(),
			verifier: self.config.verifier.clone(),
			gate: self.gate.clone(),
			kademlia: self.kademlia.clone(),
			counters: self.counters.clone(),
		};
		let dispatcher = Arc::new(Dispatcher::new(self.config.workers, worker_ctx));

		let broadcast_queue = BroadcastQueue::new(
			self.local_peer.clone(),
			self.config.signer.clone(),
			self.kademlia.clone(),
			self.dealers.clone(),
			self.counters.clone(),
		);
		let reply_queue = ReplyQueue::new(self.local_peer.clone(), self.config.signer.clone(), router.clone());

		self.messenger.install(MessengerInner {
			dispatcher: dispatcher.clone(),
			broadcast_queue: broadcast_queue.clone(),
			reply_queue: reply_queue.clone(),
			local: local.clone(),
		});

		*self.runtime.lock() = Some(Runtime { router, dispatcher, broadcast_queue, reply_queue, local });

		log::info!(target: LOG_TARGET, "transport started, listening on {}", local_endpoint);
		Ok(())
	}

	/// `run(cancel)` (`spec.md` §4.H): launches the supervised background
	/// tasks and awaits the first to exit.
	pub async fn run(&self) -> Result<()> {
		let router = {
			let runtime = self.runtime.lock();
			runtime.as_ref().map(|r| r.router.clone()).ok_or(TransportError::NoSwarmContext)?
		};

		let ctx = SupervisorContext {
			router,
			kademlia: self.kademlia.clone(),
			gate: self.gate.clone(),
			verifier: self.config.verifier.clone(),
			history: self.history.clone(),
			process_message_handler: self.config.process_message_handler.clone(),
			counters: self.counters.clone(),
			table_refresh_max_age: self.config.table_refresh_max_age,
			rebuild_ping_timeout: Duration::from_secs(5),
			refresh_lookup_timeout: Duration::from_secs(5),
			turn: self.turn.clone(),
			permissions: self.permissions.clone(),
			allocation_lifetime: self.config.allocation_lifetime,
		};

		self.supervisor.run(ctx).await
	}

	/// `stop(wait_for)` (`spec.md` §4.H/§6): cancels outstanding work,
	/// drains for `wait_for`, then disposes every resource `start` created.
	pub async fn stop(&self, wait_for: Duration) {
		self.supervisor.stop(wait_for).await;
		self.dispose();
	}

	/// `dispose()` (`spec.md` §6): tears down the router, dealers and TURN
	/// client. Safe to call even if `start` was never invoked.
	pub fn dispose(&self) {
		*self.runtime.lock() = None;
		self.dealers.sweep(|_| false);
		log::info!(target: LOG_TARGET, "transport disposed");
	}

	/// `wait_for_running()` (`spec.md` §6): resolves once `run()` has
	/// entered the `Running` state.
	pub async fn wait_for_running(&self) {
		self.supervisor.wait_for_running().await;
	}

	/// `bootstrap(peers, ping_timeout, find_timeout, depth)` (`spec.md` §6).
	pub async fn bootstrap(
		&self,
		seeds: Vec<BoundPeer>,
		ping_timeout: Duration,
		find_neighbors_timeout: Duration,
		depth: usize,
	) -> Result<()> {
		self.kademlia.bootstrap(seeds, ping_timeout, find_neighbors_timeout, depth).await
	}

	/// `add_peers(peers, timeout)` (`spec.md` §6).
	pub async fn add_peers(&self, peers: Vec<BoundPeer>, timeout: Duration) {
		self.kademlia.add_peers(peers, timeout).await
	}

	/// `find_specific_peer(target, search_addr, depth, via, timeout)`
	/// (`spec.md` §6).
	pub async fn find_specific_peer(
		&self,
		target: PeerAddress,
		search_address: PeerAddress,
		via: Vec<BoundPeer>,
		depth: usize,
		timeout: Duration,
	) -> Result<Option<BoundPeer>> {
		self.kademlia.find_specific_peer(target, search_address, via, depth, timeout).await
	}

	/// `send_message(peer, msg)` (`spec.md` §6): fire-and-forget, 3 s
	/// try-send via the dealer pool.
	pub async fn send_message(&self, peer: BoundPeer, body: MessageBody) -> Result<()> {
		let bytes =
			bytes::Bytes::from(codec::serialize(&Message::new(body, self.local_peer.clone()), self.config.signer.as_ref()));
		self.dealers.send(peer.address(), peer.endpoint(), bytes).await?;
		self.counters.record_sent();
		Ok(())
	}

	/// `send_message_with_reply(peer, msg, timeout)` (`spec.md` §6): awaits
	/// exactly one reply.
	pub async fn send_message_with_reply(&self, peer: BoundPeer, body: MessageBody, timeout: Duration) -> Result<Message> {
		let mut replies = self.send_message_with_replies(peer, body, timeout, 1).await?;
		replies.pop().ok_or_else(|| TransportError::Unexpected("no reply received".into()))
	}

	/// `send_message_with_reply(peer, msg, timeout, expected_responses)`
	/// (`spec.md` §6): awaits a list of replies.
	pub async fn send_message_with_replies(
		&self,
		peer: BoundPeer,
		body: MessageBody,
		timeout: Duration,
		expected_responses: usize,
	) -> Result<Vec<Message>> {
		let root = self.supervisor.root_cancel();
		let cancel = cancel::any(root, CancellationToken::new());
		self.ensure_permission_if_behind_nat(&peer, cancel.clone()).await;
		self.messenger.send_with_reply(peer, body, timeout, expected_responses, cancel).await
	}

	async fn ensure_permission_if_behind_nat(&self, peer: &BoundPeer, cancel: CancellationToken) {
		if let Some(turn) = &self.turn {
			if let Err(e) = turn.create_permission(peer.endpoint(), cancel).await {
				log::debug!(target: LOG_TARGET, "could not install TURN permission for {}: {}", peer.address(), e);
			} else {
				self.permissions.record(peer.address(), peer.endpoint(), std::time::Instant::now());
			}
		}
	}

	/// `broadcast_message(except, msg)` (`spec.md` §6).
	pub fn broadcast_message(&self, except: Vec<PeerAddress>, body: MessageBody) {
		if let Some(inner) = self.messenger.inner.lock().as_ref() {
			inner.broadcast_queue.broadcast(except, body);
		}
	}

	/// `reply_message(msg)` (`spec.md` §6): replies to the identity embedded
	/// in an inbound `Message`.
	pub fn reply_message(&self, message: &Message, body: MessageBody) -> Result<()> {
		let identity = message.identity.clone().ok_or_else(|| TransportError::Unexpected("message has no identity to reply to".into()))?;
		self.messenger.reply(identity, body)
	}

	/// `check_all_peers(timeout)` (`spec.md` §6): pings every peer currently
	/// in the routing table.
	pub async fn check_all_peers(&self, timeout: Duration) {
		self.kademlia.rebuild_connection(timeout).await;
	}

	/// `trace()` (`spec.md` §6): a human-readable routing-table dump.
	pub fn trace(&self) -> String {
		self.kademlia.trace()
	}

	/// Cheap, network-free snapshot of transport-level counters.
	pub fn metrics(&self) -> Metrics {
		let runtime = self.runtime.lock();
		Metrics {
			routing_table_len: self.kademlia.len(),
			dealer_pool_size: self.dealers.len(),
			router_connections: runtime.as_ref().map(|r| r.router.connection_count()).unwrap_or(0),
			in_flight_requests: runtime.as_ref().map(|r| r.dispatcher.in_flight()).unwrap_or(0),
			messages_sent: self.counters.messages_sent(),
			messages_received: self.counters.messages_received(),
			retries_issued: self.counters.retries_issued(),
		}
	}
}

