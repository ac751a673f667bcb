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

//! Per-peer TURN permission bookkeeping (`spec.md` §3 TURN State:
//! `per_peer_permissions: map<peer_address, expiry>`).

use crate::peer::PeerAddress;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// Permissions expire five minutes after being granted, per RFC 8656 §9.
pub const PERMISSION_LIFETIME: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// How much earlier than actual expiry a permission should be re-issued
/// (`spec.md` §4.C: "every `permission_lifetime - 1min`").
pub const PERMISSION_REFRESH_MARGIN: std::time::Duration = std::time::Duration::from_secs(60);

struct Grant {
	endpoint: SocketAddr,
	expires_at: Instant,
}

/// Tracks which peers currently have an installed TURN permission and when
/// each is due for renewal.
#[derive(Default)]
pub struct PermissionTable {
	grants: Mutex<HashMap<PeerAddress, Grant>>,
}

impl PermissionTable {
	/// Build an empty table.
	pub fn new() -> Self {
		PermissionTable::default()
	}

	/// Record that a permission for `peer` at `endpoint` was just (re-)granted.
	pub fn record(&self, peer: PeerAddress, endpoint: SocketAddr, now: Instant) {
		self.grants.lock().insert(peer, Grant { endpoint, expires_at: now + PERMISSION_LIFETIME });
	}

	/// Peers whose permission is due for renewal: expires within
	/// [`PERMISSION_REFRESH_MARGIN`] of `now`, or was never granted at all.
	pub fn due_for_renewal(&self, known: &[(PeerAddress, SocketAddr)], now: Instant) -> Vec<(PeerAddress, SocketAddr)> {
		let grants = self.grants.lock();
		known
			.iter()
			.filter(|(addr, _)| match grants.get(addr) {
				Some(grant) => grant.expires_at.saturating_duration_since(now) <= PERMISSION_REFRESH_MARGIN,
				None => true,
			})
			.cloned()
			.collect()
	}

	/// Drop bookkeeping for a peer no longer in the routing table.
	pub fn forget(&self, peer: PeerAddress) {
		self.grants.lock().remove(&peer);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unseen_peer_is_due_for_renewal() {
		let table = PermissionTable::new();
		let peer = PeerAddress([1u8; 32]);
		let endpoint: SocketAddr = "127.0.0.1:9000".parse().unwrap();
		let due = table.due_for_renewal(&[(peer, endpoint)], Instant::now());
		assert_eq!(due.len(), 1);
	}

	#[test]
	fn freshly_granted_peer_is_not_due() {
		let table = PermissionTable::new();
		let peer = PeerAddress([2u8; 32]);
		let endpoint: SocketAddr = "127.0.0.1:9001".parse().unwrap();
		let now = Instant::now();
		table.record(peer, endpoint, now);
		let due = table.due_for_renewal(&[(peer, endpoint)], now);
		assert!(due.is_empty());
	}

	#[test]
	fn near_expiry_peer_is_due_again() {
		let table = PermissionTable::new();
		let peer = PeerAddress([3u8; 32]);
		let endpoint: SocketAddr = "127.0.0.1:9002".parse().unwrap();
		let now = Instant::now();
		table.record(peer, endpoint, now);
		let later = now + PERMISSION_LIFETIME - std::time::Duration::from_secs(30);
		let due = table.due_for_renewal(&[(peer, endpoint)], later);
		assert_eq!(due.len(), 1);
	}
}
