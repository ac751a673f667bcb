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

//! Lifecycle Supervisor (`spec.md` §4.H): `Created -> Started -> Running ->
//! Stopped`, and the four supervised background tasks.

use crate::cancel::CancellationToken;
use crate::codec;
use crate::error::{Result, TransportError};
use crate::gate::VersionGate;
use crate::kademlia::KademliaProtocol;
use crate::message::Message;
use crate::metrics::Counters;
use crate::peer::{Peer, Verifier};
use crate::router::RouterSocket;
use crate::turn::client::{TurnClient, ALLOCATION_REFRESH_MARGIN};
use crate::turn::permission::PermissionTable;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LOG_TARGET: &str = "sc-transport::supervisor";

/// Interval between routing-table staleness sweeps (`spec.md` §4.H: "table
/// refresh (every 10s)").
pub const TABLE_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Interval between full connection rebuilds (`spec.md` §4.H: "connection
/// rebuild (every 30min)"); the first rebuild runs immediately at `run()`
/// per `spec.md` §9's resolved open question.
pub const CONNECTION_REBUILD_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum State {
	Created = 0,
	Started = 1,
	Running = 2,
	Stopped = 3,
}

impl From<u8> for State {
	fn from(value: u8) -> Self {
		match value {
			0 => State::Created,
			1 => State::Started,
			2 => State::Running,
			_ => State::Stopped,
		}
	}
}

/// Callback the host supplies for every successfully gated inbound message
/// (`spec.md` §6 constructor input `process_message_handler`).
pub type ProcessMessageHandler = std::sync::Arc<dyn Fn(Message) + Send + Sync>;

/// Everything the supervisor's tasks need once `start` has bound sockets.
pub struct SupervisorContext {
	pub router: Arc<RouterSocket>,
	pub kademlia: Arc<KademliaProtocol>,
	pub gate: Arc<VersionGate>,
	pub verifier: Arc<dyn Verifier>,
	pub history: Arc<crate::history::MessageHistory>,
	pub process_message_handler: ProcessMessageHandler,
	pub counters: Arc<Counters>,
	pub table_refresh_max_age: Duration,
	pub rebuild_ping_timeout: Duration,
	pub refresh_lookup_timeout: Duration,
	/// Present only when the transport was configured with TURN/ICE servers
	/// (`spec.md` §4.C); drives the allocation refresh loop and the
	/// permission-reissue sweep.
	pub turn: Option<Arc<TurnClient>>,
	pub permissions: Arc<PermissionTable>,
	pub allocation_lifetime: Duration,
}

/// Drives the transport through `Created -> Started -> Running -> Stopped`.
pub struct LifecycleSupervisor {
	state: AtomicU8,
	root_cancel: CancellationToken,
	local: Peer,
}

impl LifecycleSupervisor {
	/// Build a supervisor in the `Created` state.
	pub fn new(local: Peer) -> Self {
		LifecycleSupervisor { state: AtomicU8::new(State::Created as u8), root_cancel: CancellationToken::new(), local }
	}

	/// This supervisor's root cancellation token, to be combined with
	/// per-call tokens via [`crate::cancel::any`].
	pub fn root_cancel(&self) -> CancellationToken {
		self.root_cancel.clone()
	}

	fn state(&self) -> State {
		State::from(self.state.load(Ordering::SeqCst))
	}

	/// `start(cancel)` (`spec.md` §4.H): transitions `Created -> Started`.
	/// Fails with *AlreadyRunning* if re-entered.
	pub fn start(&self) -> Result<()> {
		let previous = self.state.compare_exchange(
			State::Created as u8,
			State::Started as u8,
			Ordering::SeqCst,
			Ordering::SeqCst,
		);
		match previous {
			Ok(_) => {
				log::info!(target: LOG_TARGET, "transport started for {}", self.local.address());
				Ok(())
			}
			Err(_) => Err(TransportError::AlreadyRunning),
		}
	}

	/// `run(cancel)` (`spec.md` §4.H): flips to `Running`, launches the
	/// supervised tasks (plus a TURN refresh task when TURN is configured),
	/// and awaits the first to complete. Failure of any one is fatal to `run`.
	pub async fn run(&self, ctx: SupervisorContext) -> Result<()> {
		if self.state() != State::Started {
			return Err(TransportError::Unexpected("run() called before start()".into()));
		}
		self.state.store(State::Running as u8, Ordering::SeqCst);
		log::info!(target: LOG_TARGET, "transport running");

		let cancel = self.root_cancel.clone();
		let table_refresh = table_refresh_task(ctx.kademlia.clone(), ctx.table_refresh_max_age, ctx.refresh_lookup_timeout, cancel.clone());
		let connection_rebuild = connection_rebuild_task(ctx.kademlia.clone(), ctx.rebuild_ping_timeout, cancel.clone());
		let router_poller = router_poller_task(
			ctx.router.clone(),
			ctx.kademlia.clone(),
			ctx.gate.clone(),
			ctx.verifier.clone(),
			ctx.history.clone(),
			ctx.process_message_handler.clone(),
			ctx.counters.clone(),
			cancel.clone(),
		);
		let broadcast_poller = broadcast_poller_task(cancel.clone());

		let mut tasks: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = &'static str> + Send>>> = vec![
			Box::pin(async move {
				table_refresh.await;
				"table refresh"
			}),
			Box::pin(async move {
				connection_rebuild.await;
				"connection rebuild"
			}),
			Box::pin(async move {
				router_poller.await;
				"router poller"
			}),
			Box::pin(async move {
				broadcast_poller.await;
				"broadcast poller"
			}),
		];

		if let Some(turn) = ctx.turn.clone() {
			let turn_refresh = turn_refresh_task(
				turn,
				ctx.permissions.clone(),
				ctx.kademlia.clone(),
				ctx.allocation_lifetime,
				cancel.clone(),
			);
			tasks.push(Box::pin(async move {
				turn_refresh.await;
				"turn refresh"
			}));
		}

		let (finished, _, _) = futures::future::select_all(tasks).await;
		log::warn!(target: LOG_TARGET, "supervised task '{}' exited, tearing down run()", finished);
		Err(TransportError::Unexpected(format!("supervised task '{}' exited", finished)))
	}

	/// `stop(wait_for, cancel)` (`spec.md` §4.H): cancels the worker-pool
	/// token, sleeps `wait_for` to drain in-flight work, then transitions to
	/// `Stopped`.
	pub async fn stop(&self, wait_for: Duration) {
		log::info!(target: LOG_TARGET, "stopping transport, draining for {:?}", wait_for);
		self.root_cancel.cancel();
		tokio::time::sleep(wait_for).await;
		self.state.store(State::Stopped as u8, Ordering::SeqCst);
		log::info!(target: LOG_TARGET, "transport stopped");
	}

	/// `wait_for_running()` (`spec.md` §6): resolves once `run()` has
	/// flipped the state to `Running`.
	pub async fn wait_for_running(&self) {
		while self.state() != State::Running {
			if self.state() == State::Stopped {
				return;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	}

	/// True once `stop()` has completed.
	pub fn is_stopped(&self) -> bool {
		self.state() == State::Stopped
	}
}

async fn table_refresh_task(
	kademlia: Arc<KademliaProtocol>,
	max_age: Duration,
	lookup_timeout: Duration,
	cancel: CancellationToken,
) {
	let mut ticker = tokio::time::interval(TABLE_REFRESH_INTERVAL);
	loop {
		tokio::select! {
			_ = ticker.tick() => kademlia.refresh_table(max_age, lookup_timeout).await,
			_ = cancel.cancelled() => return,
		}
	}
}

async fn connection_rebuild_task(kademlia: Arc<KademliaProtocol>, ping_timeout: Duration, cancel: CancellationToken) {
	// Run immediately, then every 30 minutes (`spec.md` §9 resolved open
	// question).
	kademlia.rebuild_connection(ping_timeout).await;
	let mut ticker = tokio::time::interval(CONNECTION_REBUILD_INTERVAL);
	ticker.tick().await;
	loop {
		tokio::select! {
			_ = ticker.tick() => kademlia.rebuild_connection(ping_timeout).await,
			_ = cancel.cancelled() => return,
		}
	}
}

/// Supervised TURN/ICE refresh loop (`spec.md` §4.C): allocates a relay
/// reservation, refreshes it `ALLOCATION_REFRESH_MARGIN` before it would
/// lapse (re-allocating from the ICE server list if the refresh itself
/// fails), and on every tick sweeps the permission table for peers due for
/// reissue.
async fn turn_refresh_task(
	turn: Arc<TurnClient>,
	permissions: Arc<PermissionTable>,
	kademlia: Arc<KademliaProtocol>,
	lifetime: Duration,
	cancel: CancellationToken,
) {
	if let Err(e) = turn.allocate_request(lifetime).await {
		log::warn!(target: LOG_TARGET, "initial TURN allocation failed: {}", e);
	}

	let refresh_every = lifetime.saturating_sub(ALLOCATION_REFRESH_MARGIN).max(Duration::from_secs(1));
	let mut ticker = tokio::time::interval(refresh_every);
	ticker.tick().await; // first tick fires immediately; the allocation above already covers it

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				if let Err(e) = turn.refresh_allocation(lifetime).await {
					log::warn!(target: LOG_TARGET, "refresh_allocation failed: {}, re-allocating", e);
					if let Err(e) = turn.allocate_request(lifetime).await {
						log::warn!(target: LOG_TARGET, "re-allocation failed: {}", e);
						continue;
					}
				}

				let known: Vec<_> = kademlia.known_peers().iter().map(|p| (p.address(), p.endpoint())).collect();
				let now = std::time::Instant::now();
				for (addr, endpoint) in permissions.due_for_renewal(&known, now) {
					match turn.create_permission(endpoint, cancel.clone()).await {
						Ok(()) => permissions.record(addr, endpoint, now),
						Err(e) => log::debug!(target: LOG_TARGET, "permission renewal for {} failed: {}", addr, e),
					}
				}
			}
			_ = cancel.cancelled() => return,
		}
	}
}

#[allow(clippy::too_many_arguments)]
async fn router_poller_task(
	router: Arc<RouterSocket>,
	kademlia: Arc<KademliaProtocol>,
	gate: Arc<VersionGate>,
	verifier: Arc<dyn Verifier>,
	history: Arc<crate::history::MessageHistory>,
	process_message_handler: ProcessMessageHandler,
	counters: Arc<Counters>,
	cancel: CancellationToken,
) {
	loop {
		tokio::select! {
			_ = router.drain_once(|identity, bytes| {
				handle_inbound_frame(identity, &bytes, &kademlia, &gate, verifier.as_ref(), &history, &process_message_handler, &counters);
			}) => {}
			_ = cancel.cancelled() => return,
		}
	}
}

#[allow(clippy::too_many_arguments)]
fn handle_inbound_frame(
	identity: crate::router::Identity,
	bytes: &[u8],
	kademlia: &KademliaProtocol,
	gate: &VersionGate,
	verifier: &dyn Verifier,
	history: &crate::history::MessageHistory,
	process_message_handler: &ProcessMessageHandler,
	counters: &Counters,
) {
	// Errors in one message never propagate out of the drain loop
	// (`spec.md` §4.D); each is logged and the loop continues.
	let message = match codec::parse(bytes, false, verifier) {
		Ok(message) => message,
		Err(e) => {
			log::warn!(target: LOG_TARGET, "dropping inbound frame from {:?}: {}", identity, e);
			return;
		}
	};

	if let Err(e) = gate.validate_sender(&message.sender, message.is_ping()) {
		log::debug!(target: LOG_TARGET, "rejecting message from {:?}: {}", identity, e);
		return;
	}

	counters.record_received();
	history.record(crate::history::Direction::Received, message.sender.address(), message.body.kind_name());
	let message = message.with_identity(identity);
	// The router's accepted-connection address is the sender's ephemeral
	// dealer-socket source port, not its dialable listening endpoint, so it
	// cannot enrich the routing table the way the dispatcher's direct
	// request/reply path can (`DESIGN.md` Open Questions).
	kademlia.receive_message(&message, None);
	process_message_handler(message);
}

async fn broadcast_poller_task(cancel: CancellationToken) {
	// The broadcast queue (`crate::queues::BroadcastQueue`) owns its own
	// consumer task spawned at construction; this poller only needs to stay
	// alive as one of the four raced tasks until cancellation, mirroring
	// `spec.md`'s four-task shape without duplicating that consumer loop.
	cancel.cancelled().await;
}
