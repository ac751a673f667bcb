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

//! Message variants.
//!
//! `spec.md`'s Design Notes re-architect the source's subclass hierarchy as
//! a tagged variant with a host-populated registry for application-defined
//! kinds, rather than dynamic dispatch.

use crate::peer::{Peer, Signature};
use codec::{Decode, Encode};

/// The built-in Kademlia message kinds plus an escape hatch for
/// host-registered application messages.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub enum MessageBody {
	/// Liveness probe.
	Ping,
	/// Reply to [`MessageBody::Ping`].
	Pong,
	/// Request the `k` peers closest to a target address.
	FindNeighbors {
		/// The target address being looked up.
		target: crate::peer::PeerAddress,
	},
	/// Reply to [`MessageBody::FindNeighbors`], carrying bound peers
	/// serialized as `(public_key, version_bytes, ip_bytes, port)` tuples so
	/// the struct stays `Encode`/`Decode` without depending on `BoundPeer`
	/// directly.
	Neighbors {
		/// The closest peers known to the replier.
		neighbors: Vec<EncodedBoundPeer>,
	},
	/// A message kind registered by the host application at construction.
	/// `kind_id` indexes into the registry handed to [`crate::codec`]; the
	/// codec does not otherwise interpret `payload`.
	User {
		/// Registry index identifying the concrete application type.
		kind_id: u32,
		/// Opaque application payload.
		payload: Vec<u8>,
	},
}

impl MessageBody {
	/// A short tag, used for logging and the message-history ring.
	pub fn kind_name(&self) -> &'static str {
		match self {
			MessageBody::Ping => "Ping",
			MessageBody::Pong => "Pong",
			MessageBody::FindNeighbors { .. } => "FindNeighbors",
			MessageBody::Neighbors { .. } => "Neighbors",
			MessageBody::User { .. } => "User",
		}
	}
}

/// Wire-safe encoding of a [`crate::peer::BoundPeer`].
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct EncodedBoundPeer {
	/// The peer's public key.
	pub public_key: Vec<u8>,
	/// The peer's app-protocol version.
	pub version: crate::peer::AppProtocolVersion,
	/// The peer's public IP, if any (empty = none).
	pub ip: Vec<u8>,
	/// The peer's listening port.
	pub port: u16,
}

/// An enveloped payload, matching `spec.md` §3's `Message`: identity set by
/// the router on inbound, a [`MessageBody`] variant, the sender [`Peer`],
/// and the signature over the canonical signable frames.
#[derive(Clone, Debug)]
pub struct Message {
	/// Opaque routing token, present only on inbound/reply frames.
	pub identity: Option<Vec<u8>>,
	/// The message contents.
	pub body: MessageBody,
	/// The purported sender.
	pub sender: Peer,
	/// Signature over the canonical signable region (`spec.md` §4.A).
	pub signature: Signature,
}

impl Message {
	/// Build an unsigned envelope for [`crate::codec::serialize`] to sign.
	pub fn new(body: MessageBody, sender: Peer) -> Self {
		Message { identity: None, body, sender, signature: Signature(Vec::new()) }
	}

	/// Attach a router identity (used when building a reply).
	pub fn with_identity(mut self, identity: Vec<u8>) -> Self {
		self.identity = Some(identity);
		self
	}

	/// True if this is a [`MessageBody::Ping`] — pings are exempt from the
	/// version gate on receive (`spec.md` §4.B).
	pub fn is_ping(&self) -> bool {
		matches!(self.body, MessageBody::Ping)
	}
}
