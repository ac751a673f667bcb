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

//! Broadcast and reply queues (`spec.md` §4.F): single-consumer unbounded
//! queues feeding the dealer pool and router socket respectively.

use crate::codec;
use crate::dealer::DealerPool;
use crate::kademlia::KademliaProtocol;
use crate::message::{Message, MessageBody};
use crate::metrics::Counters;
use crate::peer::{PeerAddress, Signer};
use crate::router::{Identity, RouterSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const LOG_TARGET: &str = "sc-transport::queues";

/// A 1-second try-send deadline for replies (`spec.md` §4.F: "failures are
/// logged, not retried").
pub const REPLY_SEND_TIMEOUT: Duration = Duration::from_secs(1);

struct BroadcastItem {
	except: Vec<PeerAddress>,
	body: MessageBody,
}

/// `broadcast(except, message)` (`spec.md` §4.F): enqueues onto this queue;
/// the consumer computes the recipient set from the routing table and fans
/// out via the [`DealerPool`]. No reply is awaited.
#[derive(Clone)]
pub struct BroadcastQueue {
	tx: mpsc::UnboundedSender<BroadcastItem>,
}

impl BroadcastQueue {
	/// Build the queue and spawn its single consumer task.
	pub fn new(
		local: crate::peer::Peer,
		signer: Arc<dyn Signer>,
		kademlia: Arc<KademliaProtocol>,
		dealers: DealerPool,
		counters: Arc<Counters>,
	) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		tokio::spawn(consume_broadcasts(rx, local, signer, kademlia, dealers, counters));
		BroadcastQueue { tx }
	}

	/// Enqueue a fire-and-forget broadcast.
	pub fn broadcast(&self, except: Vec<PeerAddress>, body: MessageBody) {
		if self.tx.send(BroadcastItem { except, body }).is_err() {
			log::warn!(target: LOG_TARGET, "broadcast queue consumer has gone away");
		}
	}
}

async fn consume_broadcasts(
	mut rx: mpsc::UnboundedReceiver<BroadcastItem>,
	local: crate::peer::Peer,
	signer: Arc<dyn Signer>,
	kademlia: Arc<KademliaProtocol>,
	dealers: DealerPool,
	counters: Arc<Counters>,
) {
	while let Some(item) = rx.recv().await {
		let recipients = kademlia.peers_to_broadcast(&item.except);
		let message = Message::new(item.body.clone(), local.clone());
		let bytes = bytes::Bytes::from(codec::serialize(&message, signer.as_ref()));

		for peer in recipients {
			let dealers = dealers.clone();
			let bytes = bytes.clone();
			let counters = counters.clone();
			tokio::spawn(async move {
				match dealers.send(peer.address(), peer.endpoint(), bytes).await {
					Ok(()) => counters.record_sent(),
					Err(e) => log::debug!(target: LOG_TARGET, "broadcast to {} failed: {}", peer.address(), e),
				}
			});
		}
	}
}

struct ReplyItem {
	identity: Identity,
	body: MessageBody,
}

/// `reply(message)` (`spec.md` §4.F): enqueues onto this queue; the
/// consumer sends through the router socket back to the identity embedded
/// in the message.
#[derive(Clone)]
pub struct ReplyQueue {
	tx: mpsc::UnboundedSender<ReplyItem>,
}

impl ReplyQueue {
	/// Build the queue and spawn its single consumer task.
	pub fn new(local: crate::peer::Peer, signer: Arc<dyn Signer>, router: Arc<RouterSocket>) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		tokio::spawn(consume_replies(rx, local, signer, router));
		ReplyQueue { tx }
	}

	/// Enqueue a reply to be routed back to `identity`.
	pub fn reply(&self, identity: Identity, body: MessageBody) {
		if self.tx.send(ReplyItem { identity, body }).is_err() {
			log::warn!(target: LOG_TARGET, "reply queue consumer has gone away");
		}
	}
}

async fn consume_replies(
	mut rx: mpsc::UnboundedReceiver<ReplyItem>,
	local: crate::peer::Peer,
	signer: Arc<dyn Signer>,
	router: Arc<RouterSocket>,
) {
	while let Some(item) = rx.recv().await {
		let message = Message::new(item.body, local.clone()).with_identity(item.identity.clone());
		let bytes = bytes::Bytes::from(codec::serialize(&message, signer.as_ref()));

		let send = async { router.reply(&item.identity, bytes) };
		match tokio::time::timeout(REPLY_SEND_TIMEOUT, send).await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => log::warn!(target: LOG_TARGET, "reply to {:?} failed: {}", item.identity, e),
			Err(_) => log::warn!(target: LOG_TARGET, "reply to {:?} timed out after {:?}", item.identity, REPLY_SEND_TIMEOUT),
		}
	}
}
