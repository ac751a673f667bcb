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

//! Kademlia protocol operations (`spec.md` §4.G): bootstrap, ping,
//! peer lookup, table refresh and broadcast peer selection, layered on top
//! of the [`Messenger`] capability rather than the transport directly.

use crate::cancel::CancellationToken;
use crate::error::{Result, TransportError};
use crate::kademlia::messenger::Messenger;
use crate::kademlia::table::RoutingTable;
use crate::message::{Message, MessageBody};
use crate::peer::{BoundPeer, PeerAddress};
use parking_lot::Mutex;
use rand::RngCore;
use std::sync::Arc;
use std::time::{Duration, Instant};

const LOG_TARGET: &str = "sc-transport::kademlia";

/// Default number of peers sampled per bucket for a broadcast fan-out.
pub const DEFAULT_BROADCAST_PER_BUCKET: usize = 2;

/// The Kademlia routing protocol: owns the [`RoutingTable`] and drives it
/// via the injected [`Messenger`] capability.
pub struct KademliaProtocol {
	table: Mutex<RoutingTable>,
	messenger: Arc<dyn Messenger>,
}

impl KademliaProtocol {
	/// Build a protocol instance over an empty routing table.
	pub fn new(our_address: PeerAddress, table_size: usize, bucket_size: usize, messenger: Arc<dyn Messenger>) -> Self {
		KademliaProtocol { table: Mutex::new(RoutingTable::new(our_address, table_size, bucket_size)), messenger }
	}

	/// `ping(peer, timeout)` (`spec.md` §4.G): on success the peer is
	/// promoted to most-recently-seen; on failure it is demoted.
	pub async fn ping(&self, peer: BoundPeer, timeout: Duration) -> Result<()> {
		let address = peer.address();
		let result = self
			.messenger
			.send_with_reply(peer.clone(), MessageBody::Ping, timeout, 1, CancellationToken::new())
			.await;

		match result {
			Ok(replies) if replies.iter().any(|m| matches!(m.body, MessageBody::Pong)) => {
				self.table.lock().on_ping_success(peer, Instant::now());
				Ok(())
			}
			Ok(_) => {
				log::warn!(target: LOG_TARGET, "ping to {} answered without a Pong", address);
				self.table.lock().on_ping_failure(address);
				Err(TransportError::Unexpected("ping answered without a Pong".into()))
			}
			Err(e) => {
				log::debug!(target: LOG_TARGET, "ping to {} failed: {}", address, e);
				self.table.lock().on_ping_failure(address);
				Err(e)
			}
		}
	}

	/// `bootstrap(seeds, ping_timeout, find_neighbors_timeout, depth)`
	/// (`spec.md` §6): ping every seed, then perform a self-lookup to
	/// populate the table from the seeds' own routing knowledge.
	pub async fn bootstrap(
		&self,
		seeds: Vec<BoundPeer>,
		ping_timeout: Duration,
		find_neighbors_timeout: Duration,
		depth: usize,
	) -> Result<()> {
		let mut reachable = Vec::new();
		for seed in seeds {
			match self.ping(seed.clone(), ping_timeout).await {
				Ok(()) => reachable.push(seed),
				Err(e) => log::warn!(target: LOG_TARGET, "bootstrap seed {} unreachable: {}", seed.address(), e),
			}
		}

		if reachable.is_empty() {
			return Err(TransportError::Unexpected("no reachable bootstrap seeds".into()));
		}

		let our_address = self.messenger.local_peer().address();
		self.find_specific_peer(our_address, our_address, reachable, depth, find_neighbors_timeout).await?;
		Ok(())
	}

	/// `add_peers(peers, timeout)` (`spec.md` §6): ping every given peer
	/// and let success/failure update the table as usual.
	pub async fn add_peers(&self, peers: Vec<BoundPeer>, timeout: Duration) {
		for peer in peers {
			let _ = self.ping(peer, timeout).await;
		}
	}

	/// `find_specific_peer(target, search_address, via, depth, timeout)`
	/// (`spec.md` §4.G/§6): iterative lookup for the peer nearest
	/// `search_address`, querying `via` and then the closest responses,
	/// up to `depth` rounds. Returns the exact peer if `target` is found
	/// among the results, else `None`.
	pub async fn find_specific_peer(
		&self,
		target: PeerAddress,
		search_address: PeerAddress,
		via: Vec<BoundPeer>,
		depth: usize,
		timeout: Duration,
	) -> Result<Option<BoundPeer>> {
		let mut queried = std::collections::HashSet::new();
		let mut candidates: Vec<BoundPeer> = via;
		candidates.extend(self.table.lock().all_peers());
		dedup_by_address(&mut candidates);
		sort_by_distance(&mut candidates, search_address);

		for round in 0..depth.max(1) {
			let to_query: Vec<BoundPeer> = candidates
				.iter()
				.filter(|p| !queried.contains(&p.address()))
				.take(self.table.lock().bucket_size())
				.cloned()
				.collect();
			if to_query.is_empty() {
				break;
			}
			log::debug!(target: LOG_TARGET, "find_specific_peer round {} querying {} peers", round, to_query.len());

			let mut discovered = Vec::new();
			for peer in &to_query {
				queried.insert(peer.address());
				let result = self
					.messenger
					.send_with_reply(
						peer.clone(),
						MessageBody::FindNeighbors { target: search_address },
						timeout,
						1,
						CancellationToken::new(),
					)
					.await;
				match result {
					Ok(replies) => {
						self.table.lock().on_ping_success(peer.clone(), Instant::now());
						for reply in replies {
							if let MessageBody::Neighbors { neighbors } = reply.body {
								discovered.extend(neighbors.into_iter().filter_map(decode_bound_peer));
							}
						}
					}
					Err(e) => {
						log::debug!(target: LOG_TARGET, "find_neighbors to {} failed: {}", peer.address(), e);
						self.table.lock().on_ping_failure(peer.address());
					}
				}
			}

			if discovered.is_empty() {
				break;
			}
			candidates.extend(discovered);
			dedup_by_address(&mut candidates);
			sort_by_distance(&mut candidates, search_address);
		}

		Ok(candidates.into_iter().find(|p| p.address() == target))
	}

	/// `receive_message(message, endpoint_hint)` (`spec.md` §4.G): record the
	/// sender as seen, and answer `Ping`/`FindNeighbors` requests in place.
	/// `endpoint_hint` is the dialable address the message was actually
	/// observed arriving from or being sent to — a direct dealer reply
	/// carries the address the dispatcher just connected to; a router-
	/// inbound frame carries the accepted TCP connection's peer address.
	/// Without it this node would otherwise only ever learn of a peer
	/// through an explicit `ping`/`find_specific_peer`/`add_peers` call.
	pub fn receive_message(&self, message: &Message, endpoint_hint: Option<std::net::SocketAddr>) {
		let sender_address = message.sender.address();
		if let Some(endpoint) = endpoint_hint {
			let bound = BoundPeer::new(message.sender.clone(), endpoint);
			self.table.lock().on_ping_success(bound, Instant::now());
		}

		match &message.body {
			MessageBody::Ping => {
				if let Some(identity) = message.identity.clone() {
					if let Err(e) = self.messenger.reply(identity, MessageBody::Pong) {
						log::warn!(target: LOG_TARGET, "failed to reply to Ping from {}: {}", sender_address, e);
					}
				}
			}
			MessageBody::FindNeighbors { target } => {
				if let Some(identity) = message.identity.clone() {
					let neighbors = self.closest_peers(*target, self.table.lock().bucket_size());
					let body = MessageBody::Neighbors {
						neighbors: neighbors.iter().map(encode_bound_peer).collect(),
					};
					if let Err(e) = self.messenger.reply(identity, body) {
						log::warn!(target: LOG_TARGET, "failed to reply to FindNeighbors from {}: {}", sender_address, e);
					}
				}
			}
			_ => {}
		}
	}

	/// `refresh_table(max_age)` (`spec.md` §4.G): perform a random-ID
	/// lookup for each bucket whose oldest member is older than `max_age`.
	pub async fn refresh_table(&self, max_age: Duration, lookup_timeout: Duration) {
		let stale = self.table.lock().stale_buckets(max_age, Instant::now());
		if stale.is_empty() {
			return;
		}
		let known = self.table.lock().all_peers();
		if known.is_empty() {
			return;
		}
		for _ in &stale {
			let random_target = PeerAddress(random_address());
			let _ = self.find_specific_peer(random_target, random_target, known.clone(), 1, lookup_timeout).await;
		}
	}

	/// `check_replacement_cache()` (`spec.md` §4.G): no-op placeholder for
	/// the table's own internal replacement-cache bookkeeping, which this
	/// implementation keeps self-contained in [`RoutingTable::on_ping_failure`]
	/// rather than exposing a separate sweep; kept as a named operation so
	/// the lifecycle supervisor's call sites match `spec.md`.
	pub fn check_replacement_cache(&self) {
		log::trace!(target: LOG_TARGET, "replacement caches are reconciled inline on ping failure");
	}

	/// `rebuild_connection()` (`spec.md` §4.G/§9): re-ping every peer
	/// currently in the table, demoting any that no longer answer. Per
	/// `spec.md` §9 this must run immediately at start and then every 30
	/// minutes — the "every 30 minutes" half is the lifecycle supervisor's
	/// concern (`crate::supervisor`); this method is the per-iteration body.
	pub async fn rebuild_connection(&self, timeout: Duration) {
		let peers = self.table.lock().all_peers();
		for peer in peers {
			let _ = self.ping(peer, timeout).await;
		}
	}

	/// `peers_to_broadcast(except)` (`spec.md` §4.G/§4.F).
	pub fn peers_to_broadcast(&self, except: &[PeerAddress]) -> Vec<BoundPeer> {
		self.table.lock().peers_to_broadcast(except, DEFAULT_BROADCAST_PER_BUCKET)
	}

	/// The `k` peers closest to `target` currently known.
	pub fn closest_peers(&self, target: PeerAddress, k: usize) -> Vec<BoundPeer> {
		let mut peers = self.table.lock().all_peers();
		sort_by_distance(&mut peers, target);
		peers.truncate(k);
		peers
	}

	/// Every peer currently live in the table, for callers (e.g. the TURN
	/// permission sweep) that need the full membership rather than a
	/// broadcast-style sample.
	pub fn known_peers(&self) -> Vec<BoundPeer> {
		self.table.lock().all_peers()
	}

	/// Current number of live peers in the table.
	pub fn len(&self) -> usize {
		self.table.lock().len()
	}

	/// True if the table holds no peers.
	pub fn is_empty(&self) -> bool {
		self.table.lock().is_empty()
	}

	/// True if `addr` is currently a live member of the table.
	pub fn contains(&self, addr: PeerAddress) -> bool {
		self.table.lock().contains(addr)
	}

	/// `trace()` (`spec.md` §6): a human-readable routing-table dump.
	pub fn trace(&self) -> String {
		self.table.lock().trace()
	}
}

fn dedup_by_address(peers: &mut Vec<BoundPeer>) {
	let mut seen = std::collections::HashSet::new();
	peers.retain(|p| seen.insert(p.address()));
}

fn sort_by_distance(peers: &mut Vec<BoundPeer>, target: PeerAddress) {
	peers.sort_by_key(|p| target.distance(&p.address()));
}

fn random_address() -> [u8; 32] {
	let mut bytes = [0u8; 32];
	rand::thread_rng().fill_bytes(&mut bytes);
	bytes
}

fn encode_bound_peer(peer: &BoundPeer) -> crate::message::EncodedBoundPeer {
	let ip = match peer.endpoint().ip() {
		std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
		std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
	};
	crate::message::EncodedBoundPeer {
		public_key: peer.peer().public_key().0.clone(),
		version: peer.peer().app_protocol_version().clone(),
		ip,
		port: peer.endpoint().port(),
	}
}

fn decode_bound_peer(encoded: crate::message::EncodedBoundPeer) -> Option<BoundPeer> {
	let ip: std::net::IpAddr = match encoded.ip.len() {
		4 => {
			let mut octets = [0u8; 4];
			octets.copy_from_slice(&encoded.ip);
			std::net::Ipv4Addr::from(octets).into()
		}
		16 => {
			let mut octets = [0u8; 16];
			octets.copy_from_slice(&encoded.ip);
			std::net::Ipv6Addr::from(octets).into()
		}
		_ => return None,
	};
	let key = crate::peer::PublicKey(encoded.public_key);
	let peer = crate::peer::Peer::new(key, encoded.version, Some(ip));
	Some(BoundPeer::new(peer, (ip, encoded.port).into()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::peer::{AppProtocolVersion, Peer, PublicKey, Signature};
	use async_trait::async_trait;
	use std::sync::Mutex as StdMutex;

	struct MockMessenger {
		local: BoundPeer,
		pong_from: StdMutex<std::collections::HashSet<PeerAddress>>,
	}

	#[async_trait]
	impl Messenger for MockMessenger {
		async fn send_with_reply(
			&self,
			peer: BoundPeer,
			body: MessageBody,
			_timeout: Duration,
			_expected_responses: usize,
			_cancel: CancellationToken,
		) -> Result<Vec<Message>> {
			match body {
				MessageBody::Ping if self.pong_from.lock().unwrap().contains(&peer.address()) => {
					Ok(vec![Message::new(MessageBody::Pong, peer.peer().clone())])
				}
				MessageBody::Ping => Err(TransportError::Timeout),
				MessageBody::FindNeighbors { .. } => {
					Ok(vec![Message::new(MessageBody::Neighbors { neighbors: vec![] }, peer.peer().clone())])
				}
				_ => Err(TransportError::Unexpected("unsupported in mock".into())),
			}
		}

		async fn broadcast(&self, _except: Vec<PeerAddress>, _body: MessageBody) {}

		fn reply(&self, _identity: Vec<u8>, _body: MessageBody) -> Result<()> {
			Ok(())
		}

		fn local_peer(&self) -> BoundPeer {
			self.local.clone()
		}
	}

	fn bound_peer(id: u8) -> BoundPeer {
		let key = PublicKey(vec![id]);
		let version =
			AppProtocolVersion { version: 1, extra: vec![], signature: Signature(vec![]), signer: key.clone() };
		let peer = Peer::new(key, version, None);
		BoundPeer::new(peer, ([127, 0, 0, 1], 1000 + id as u16).into())
	}

	#[tokio::test]
	async fn ping_success_adds_peer_to_table() {
		let local = bound_peer(0);
		let remote = bound_peer(1);
		let mut pong_from = std::collections::HashSet::new();
		pong_from.insert(remote.address());
		let messenger =
			Arc::new(MockMessenger { local: local.clone(), pong_from: StdMutex::new(pong_from) });
		let protocol = KademliaProtocol::new(local.address(), 256, 4, messenger);

		protocol.ping(remote.clone(), Duration::from_millis(100)).await.unwrap();
		assert!(protocol.contains(remote.address()));
	}

	#[tokio::test]
	async fn ping_failure_does_not_add_peer() {
		let local = bound_peer(0);
		let remote = bound_peer(2);
		let messenger =
			Arc::new(MockMessenger { local: local.clone(), pong_from: StdMutex::new(Default::default()) });
		let protocol = KademliaProtocol::new(local.address(), 256, 4, messenger);

		assert!(protocol.ping(remote.clone(), Duration::from_millis(100)).await.is_err());
		assert!(!protocol.contains(remote.address()));
	}

	#[tokio::test]
	async fn bootstrap_fails_with_no_reachable_seeds() {
		let local = bound_peer(0);
		let messenger =
			Arc::new(MockMessenger { local: local.clone(), pong_from: StdMutex::new(Default::default()) });
		let protocol = KademliaProtocol::new(local.address(), 256, 4, messenger);

		let seeds = vec![bound_peer(3)];
		let err = protocol.bootstrap(seeds, Duration::from_millis(50), Duration::from_millis(50), 1).await;
		assert!(err.is_err());
	}
}
