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

//! Request Dispatcher (`spec.md` §4.F): `send_with_reply`, a fixed worker
//! pool, and the 10-retry/100ms-backoff policy.

use crate::cancel::CancellationToken;
use crate::codec;
use crate::dealer;
use crate::error::{Result, TransportError};
use crate::gate::VersionGate;
use crate::kademlia::KademliaProtocol;
use crate::message::{Message, MessageBody};
use crate::metrics::Counters;
use crate::peer::{BoundPeer, Signer, Verifier};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const LOG_TARGET: &str = "sc-transport::dispatcher";

/// Maximum retries before a request is abandoned (`spec.md` §4.F).
pub const MAX_RETRIES: u32 = 10;

/// Backoff between retries (`spec.md` §4.F: "re-enqueued ... after 100 ms").
pub const RETRY_BACKOFF: Duration = Duration::from_millis(100);

struct MessageRequest {
	peer: BoundPeer,
	body: MessageBody,
	timeout: Duration,
	expected_responses: usize,
	cancel: CancellationToken,
	retry_count: u32,
	completion: oneshot::Sender<Result<Vec<Message>>>,
}

/// The dispatcher: an unbounded work queue plus a fixed pool of worker
/// tasks, each of which owns a dedicated (non-pooled) dealer socket for the
/// lifetime of one request/reply exchange (`spec.md` §4.F rationale).
pub struct Dispatcher {
	queue_tx: mpsc::UnboundedSender<MessageRequest>,
	in_flight: Arc<AtomicUsize>,
	next_request_id: AtomicU64,
}

/// Shared, cloneable context every worker task needs to process a request.
#[derive(Clone)]
pub struct WorkerContext {
	pub local: BoundPeer,
	pub signer: Arc<dyn Signer>,
	pub verifier: Arc<dyn Verifier>,
	pub gate: Arc<VersionGate>,
	pub kademlia: Arc<KademliaProtocol>,
	pub counters: Arc<Counters>,
}

impl Dispatcher {
	/// Build a dispatcher and spawn `workers` worker tasks against `ctx`.
	pub fn new(workers: usize, ctx: WorkerContext) -> Self {
		let (queue_tx, queue_rx) = mpsc::unbounded_channel();
		let in_flight = Arc::new(AtomicUsize::new(0));
		let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));

		for worker_id in 0..workers.max(1) {
			let queue_rx = queue_rx.clone();
			let requeue = queue_tx.clone();
			let in_flight = in_flight.clone();
			let ctx = ctx.clone();
			tokio::spawn(worker_loop(worker_id, queue_rx, requeue, in_flight, ctx));
		}

		Dispatcher { queue_tx, in_flight, next_request_id: AtomicU64::new(0) }
	}

	/// `send_with_reply(peer, message, timeout, expected_responses, cancel)`
	/// (`spec.md` §4.F algorithm): enqueue the request and await its
	/// completion handle.
	pub async fn send_with_reply(
		&self,
		peer: BoundPeer,
		body: MessageBody,
		timeout: Duration,
		expected_responses: usize,
		cancel: CancellationToken,
	) -> Result<Vec<Message>> {
		let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
		let (completion_tx, completion_rx) = oneshot::channel();
		self.in_flight.fetch_add(1, Ordering::Relaxed);

		let request = MessageRequest {
			peer,
			body,
			timeout,
			expected_responses,
			cancel: cancel.clone(),
			retry_count: 0,
			completion: completion_tx,
		};
		log::trace!(target: LOG_TARGET, "enqueuing request {}", request_id);
		self.queue_tx
			.send(request)
			.map_err(|_| TransportError::Unexpected("dispatcher queue closed".into()))?;

		tokio::select! {
			result = completion_rx => {
				self.in_flight.fetch_sub(1, Ordering::Relaxed);
				result.map_err(|_| TransportError::Unexpected("worker dropped completion handle".into()))?
			}
			_ = cancel.cancelled() => {
				self.in_flight.fetch_sub(1, Ordering::Relaxed);
				Err(TransportError::Cancelled)
			}
		}
	}

	/// Number of requests currently enqueued or in-flight with a worker.
	pub fn in_flight(&self) -> usize {
		self.in_flight.load(Ordering::Relaxed)
	}
}

async fn worker_loop(
	worker_id: usize,
	queue_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<MessageRequest>>>,
	requeue: mpsc::UnboundedSender<MessageRequest>,
	in_flight: Arc<AtomicUsize>,
	ctx: WorkerContext,
) {
	loop {
		let request = {
			let mut rx = queue_rx.lock().await;
			match rx.recv().await {
				Some(request) => request,
				None => return,
			}
		};

		if request.cancel.is_cancelled() {
			let _ = request.completion.send(Err(TransportError::Cancelled));
			in_flight.fetch_sub(1, Ordering::Relaxed);
			continue;
		}

		match process_one(worker_id, &request, &ctx).await {
			Ok(replies) => {
				let _ = request.completion.send(Ok(replies));
			}
			Err(e) if !e.is_retryable() => {
				let _ = request.completion.send(Err(e));
			}
			Err(e) if request.retry_count >= MAX_RETRIES => {
				log::warn!(
					target: LOG_TARGET,
					"worker {}: giving up on {} after {} retries: {}",
					worker_id,
					request.peer.address(),
					request.retry_count,
					e
				);
				let _ = request.completion.send(Err(TransportError::Timeout));
			}
			Err(e) => {
				log::debug!(
					target: LOG_TARGET,
					"worker {}: retrying request to {} (attempt {}): {}",
					worker_id,
					request.peer.address(),
					request.retry_count + 1,
					e
				);
				ctx.counters.record_retry();
				let peer = request.peer.clone();
				let body = request.body.clone();
				let timeout = request.timeout;
				let expected_responses = request.expected_responses;
				let cancel = request.cancel.clone();
				let retry_count = request.retry_count + 1;
				let completion = request.completion;
				tokio::spawn(async move {
					tokio::time::sleep(RETRY_BACKOFF).await;
					let _ = requeue.send(MessageRequest {
						peer,
						body,
						timeout,
						expected_responses,
						cancel,
						retry_count,
						completion,
					});
				});
				in_flight.fetch_sub(1, Ordering::Relaxed);
				continue;
			}
		}
		in_flight.fetch_sub(1, Ordering::Relaxed);
	}
}

async fn process_one(worker_id: usize, request: &MessageRequest, ctx: &WorkerContext) -> Result<Vec<Message>> {
	let mut framed = dealer::connect_one_shot(request.peer.endpoint()).await?;

	let outbound = Message::new(request.body.clone(), ctx.local.peer().clone());
	let bytes = codec::serialize(&outbound, ctx.signer.as_ref());

	tokio::time::timeout(request.timeout, framed.send(bytes.into()))
		.await
		.map_err(|_| TransportError::Timeout)?
		.map_err(TransportError::from)?;
	ctx.counters.record_sent();

	let mut replies = Vec::with_capacity(request.expected_responses);
	for _ in 0..request.expected_responses.max(1) {
		let frame = tokio::time::timeout(request.timeout, framed.next())
			.await
			.map_err(|_| TransportError::Timeout)?
			.ok_or(TransportError::SocketError("connection closed before reply".into()))?
			.map_err(TransportError::from)?;

		let message = codec::parse(&frame, true, ctx.verifier.as_ref())?;
		ctx.gate.validate_sender(&message.sender, message.is_ping())?;
		ctx.counters.record_received();
		replies.push(message);
	}

	log::trace!(
		target: LOG_TARGET,
		"worker {}: received {} reply/replies from {}",
		worker_id,
		replies.len(),
		request.peer.address()
	);

	if let Some(first) = replies.first() {
		ctx.kademlia.receive_message(first, Some(request.peer.endpoint()));
	}

	Ok(replies)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn send_with_reply_to_unreachable_peer_exhausts_retries_or_times_out() {
		let peer = crate::peer::PublicKey(vec![1]);
		let version = crate::peer::AppProtocolVersion {
			version: 1,
			extra: vec![],
			signature: crate::peer::Signature(vec![]),
			signer: peer.clone(),
		};
		let local = BoundPeer::new(
			crate::peer::Peer::new(peer.clone(), version.clone(), None),
			([127, 0, 0, 1], 1).into(),
		);
		let unreachable = BoundPeer::new(crate::peer::Peer::new(peer, version, None), ([127, 0, 0, 1], 1).into());

		let table_messenger = crate::test_support::NullVerifier;
		let _ = table_messenger;
		let messenger_verifier: Arc<dyn Verifier> = Arc::new(crate::test_support::KeyPair::generate(9));
		let signer: Arc<dyn Signer> = Arc::new(crate::test_support::KeyPair::generate(9));
		let gate = Arc::new(VersionGate::new(
			crate::peer::VersionPolicy::new(
				crate::peer::AppProtocolVersion::signed(1, vec![], &crate::test_support::KeyPair::generate(9)),
				Default::default(),
			),
			Arc::new(|_| {}),
		));
		struct NoopMessenger(BoundPeer);
		#[async_trait::async_trait]
		impl crate::kademlia::Messenger for NoopMessenger {
			async fn send_with_reply(
				&self,
				_peer: BoundPeer,
				_body: MessageBody,
				_timeout: Duration,
				_expected_responses: usize,
				_cancel: CancellationToken,
			) -> Result<Vec<Message>> {
				Err(TransportError::Timeout)
			}
			async fn broadcast(&self, _except: Vec<crate::peer::PeerAddress>, _body: MessageBody) {}
			fn reply(&self, _identity: Vec<u8>, _body: MessageBody) -> Result<()> {
				Ok(())
			}
			fn local_peer(&self) -> BoundPeer {
				self.0.clone()
			}
		}
		let kademlia = Arc::new(KademliaProtocol::new(
			local.address(),
			16,
			4,
			Arc::new(NoopMessenger(local.clone())),
		));

		let counters = Arc::new(Counters::default());
		let ctx = WorkerContext { local, signer, verifier: messenger_verifier, gate, kademlia, counters };
		let dispatcher = Dispatcher::new(1, ctx);

		let result = dispatcher
			.send_with_reply(unreachable, MessageBody::Ping, Duration::from_millis(50), 1, CancellationToken::new())
			.await;
		assert!(result.is_err());
	}
}
