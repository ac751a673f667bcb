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

//! Peer identity & version gate (`spec.md` §4.B).

use crate::error::{Result, TransportError, VersionMismatch};
use crate::peer::{Peer, VersionPolicy};

const LOG_TARGET: &str = "sc-transport::gate";

/// Invoked on a version mismatch, mirroring the source's
/// `IsCompatibleWith`, which both returns a boolean and fires a side-effect
/// callback (`spec.md` §9 Design Notes). The callback is a hook, not a veto
/// after acceptance: it never runs on the accept path.
pub type DifferentVersionCallback = std::sync::Arc<dyn Fn(VersionMismatch) + Send + Sync>;

/// The version gate: a thin wrapper pairing a [`VersionPolicy`] with the
/// callback invoked on rejection.
pub struct VersionGate {
	policy: VersionPolicy,
	on_different_version: DifferentVersionCallback,
}

impl VersionGate {
	/// Build a gate from a policy and a mismatch callback.
	pub fn new(policy: VersionPolicy, on_different_version: DifferentVersionCallback) -> Self {
		VersionGate { policy, on_different_version }
	}

	/// `validate_sender(peer) -> Ok | DifferentAppProtocolVersion`
	/// (`spec.md` §4.B). Pings are exempt from this check on receive so
	/// unknown versions can still answer liveness probes during bootstrap.
	pub fn validate_sender(&self, peer: &Peer, is_ping: bool) -> Result<()> {
		if is_ping {
			log::debug!(target: LOG_TARGET, "bypassing version gate for ping from {}", peer.address());
			return Ok(());
		}

		if self.policy.accepts(peer.app_protocol_version()) {
			log::debug!(target: LOG_TARGET, "peer {} passed the version gate", peer.address());
			return Ok(());
		}

		let mismatch = VersionMismatch {
			peer: peer.address(),
			expected: self.policy.our_version.clone(),
			actual: peer.app_protocol_version().clone(),
		};
		log::warn!(
			target: LOG_TARGET,
			"peer {} advertises incompatible app protocol version {} (expected {})",
			peer.address(),
			mismatch.actual.version,
			mismatch.expected.version,
		);
		(self.on_different_version)(mismatch.clone());

		Err(TransportError::DifferentAppProtocolVersion {
			peer: mismatch.peer,
			ours: mismatch.expected.version,
			theirs: mismatch.actual.version,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::MessageBody;
	use crate::peer::AppProtocolVersion;
	use crate::test_support::KeyPair;
	use std::collections::HashSet;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::sync::Arc;

	fn make_peer(version: u32, signer: &KeyPair) -> Peer {
		let v = AppProtocolVersion::signed(version, vec![], signer);
		Peer::new(signer.public_key(), v, None)
	}

	#[test]
	fn accepts_matching_version() {
		let us = KeyPair::generate(1);
		let policy =
			VersionPolicy::new(AppProtocolVersion::signed(1, vec![], &us), HashSet::new());
		let gate = VersionGate::new(policy, Arc::new(|_| panic!("should not fire")));
		let peer = make_peer(1, &KeyPair::generate(2));
		assert!(gate.validate_sender(&peer, false).is_ok());
	}

	#[test]
	fn rejects_mismatched_version_and_fires_callback() {
		let us = KeyPair::generate(1);
		let policy =
			VersionPolicy::new(AppProtocolVersion::signed(2, vec![], &us), HashSet::new());
		let fired = Arc::new(AtomicBool::new(false));
		let fired_clone = fired.clone();
		let gate =
			VersionGate::new(policy, Arc::new(move |_| fired_clone.store(true, Ordering::SeqCst)));

		let peer = make_peer(1, &KeyPair::generate(2));
		let err = gate.validate_sender(&peer, false).unwrap_err();
		assert!(matches!(err, TransportError::DifferentAppProtocolVersion { .. }));
		assert!(fired.load(Ordering::SeqCst));
	}

	#[test]
	fn trusted_signer_overrides_version_mismatch() {
		let us = KeyPair::generate(1);
		let other = KeyPair::generate(2);
		let mut trusted = HashSet::new();
		trusted.insert(other.public_key());
		let policy = VersionPolicy::new(AppProtocolVersion::signed(2, vec![], &us), trusted);
		let gate = VersionGate::new(policy, Arc::new(|_| panic!("should not fire")));

		let peer = make_peer(1, &other);
		assert!(gate.validate_sender(&peer, false).is_ok());
	}

	#[test]
	fn ping_bypasses_the_gate_regardless_of_version() {
		let us = KeyPair::generate(1);
		let policy =
			VersionPolicy::new(AppProtocolVersion::signed(9, vec![], &us), HashSet::new());
		let gate = VersionGate::new(policy, Arc::new(|_| panic!("should not fire")));
		let peer = make_peer(1, &KeyPair::generate(2));
		assert!(gate.validate_sender(&peer, true).is_ok());
		let _ = MessageBody::Ping;
	}
}
