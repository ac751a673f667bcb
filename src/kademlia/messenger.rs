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

//! The narrow capability the Kademlia protocol needs from the transport
//! (`spec.md` §9 Design Notes): "the protocol depends on a narrow Messenger
//! capability `{send_with_reply, broadcast, reply, peers}` injected as an
//! interface. The transport implements the capability ... no cycle at the
//! type level."

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::message::{Message, MessageBody};
use crate::peer::{BoundPeer, PeerAddress};
use std::time::Duration;

/// Capability injected into [`crate::kademlia::protocol::KademliaProtocol`]
/// so it can drive the transport without the transport needing a
/// compile-time dependency back on the protocol.
#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
	/// Send `body` to `peer` and collect `expected_responses` reply
	/// messages, or fail per `spec.md` §4.F.
	async fn send_with_reply(
		&self,
		peer: BoundPeer,
		body: MessageBody,
		timeout: Duration,
		expected_responses: usize,
		cancel: CancellationToken,
	) -> Result<Vec<Message>>;

	/// Fan out `body` to the peers the transport selects for broadcast,
	/// excluding `except`. Fire-and-forget: no reply is awaited.
	async fn broadcast(&self, except: Vec<PeerAddress>, body: MessageBody);

	/// Send `body` back through the router socket to the identity that
	/// originally addressed an inbound request (`spec.md` §4.F `reply`).
	fn reply(&self, identity: Vec<u8>, body: MessageBody) -> Result<()>;

	/// This node's own bound identity, used when the protocol needs to
	/// describe itself (e.g. in a `Neighbors` reply that includes the
	/// responder).
	fn local_peer(&self) -> BoundPeer;
}
