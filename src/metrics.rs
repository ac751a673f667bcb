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

//! A cheap read-only snapshot of transport-level counters
//! (`SPEC_FULL.md` §6: `Transport::metrics() -> Metrics`, no network I/O).

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals threaded through the dispatcher, dealer-pool and router
/// paths, read out as a [`Metrics`] snapshot.
#[derive(Default)]
pub struct Counters {
	messages_sent: AtomicU64,
	messages_received: AtomicU64,
	retries_issued: AtomicU64,
}

impl Counters {
	/// One outbound message left this node (request, reply or broadcast
	/// fan-out target), independent of whether it is later retried.
	pub fn record_sent(&self) {
		self.messages_sent.fetch_add(1, Ordering::Relaxed);
	}

	/// One inbound message was parsed and passed the version gate.
	pub fn record_received(&self) {
		self.messages_received.fetch_add(1, Ordering::Relaxed);
	}

	/// The dispatcher re-enqueued a request after a retryable failure.
	pub fn record_retry(&self) {
		self.retries_issued.fetch_add(1, Ordering::Relaxed);
	}

	/// Total messages sent so far.
	pub fn messages_sent(&self) -> u64 {
		self.messages_sent.load(Ordering::Relaxed)
	}

	/// Total messages received so far.
	pub fn messages_received(&self) -> u64 {
		self.messages_received.load(Ordering::Relaxed)
	}

	/// Total retries issued so far.
	pub fn retries_issued(&self) -> u64 {
		self.retries_issued.load(Ordering::Relaxed)
	}
}

/// Point-in-time counters, useful for diagnostics and tests.
#[derive(Debug, Clone, Copy)]
pub struct Metrics {
	/// Number of live peers in the routing table.
	pub routing_table_len: usize,
	/// Number of currently open dealer-pool connections.
	pub dealer_pool_size: usize,
	/// Number of open inbound router connections.
	pub router_connections: usize,
	/// Number of requests currently enqueued or awaiting a worker.
	pub in_flight_requests: usize,
	/// Total messages sent since this transport was built.
	pub messages_sent: u64,
	/// Total messages received since this transport was built.
	pub messages_received: u64,
	/// Total dispatcher retries issued since this transport was built.
	pub retries_issued: u64,
}
