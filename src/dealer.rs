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

//! Dealer pool (`spec.md` §4.E): lazily-created outbound sockets, one per
//! peer address, used by broadcast and fire-and-forget sends. Dedicated,
//! non-pooled dealers for request/reply exchanges are opened directly by
//! [`crate::dispatcher`] (`spec.md` §4.F's "per-request dealer" rationale).

use crate::error::{Result, TransportError};
use crate::peer::PeerAddress;
use crate::wire::frame;
use bytes::Bytes;
use futures::SinkExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

const LOG_TARGET: &str = "sc-transport::dealer";

/// Default deadline for a pooled dealer's send attempt (`spec.md` §4.E: "a
/// 3-second try-send").
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(3);

struct DealerEntry {
	endpoint: SocketAddr,
	conn: AsyncMutex<Option<tokio_util::codec::Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>>>,
}

/// Mapping `peer_address -> outbound_socket` (`spec.md` §3). Entries are
/// removed when a send fails or the peer drops out of the routing table;
/// disposal of the underlying socket is mandatory on removal, which here
/// just means dropping the `TcpStream`.
#[derive(Clone)]
pub struct DealerPool {
	send_timeout: Duration,
	entries: Arc<RwLock<HashMap<PeerAddress, Arc<DealerEntry>>>>,
}

impl DealerPool {
	/// Build an empty pool with the given per-send timeout.
	pub fn new(send_timeout: Duration) -> Self {
		DealerPool { send_timeout, entries: Arc::new(RwLock::new(HashMap::new())) }
	}

	/// Number of currently pooled dealers.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// True if the pool has no entries.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Send `bytes` to `peer` at `endpoint`, creating the dealer socket on
	/// first use. On timeout or I/O failure the entry is disposed and
	/// removed, so the next attempt recreates it.
	pub async fn send(&self, peer: PeerAddress, endpoint: SocketAddr, bytes: Bytes) -> Result<()> {
		let entry = self.get_or_create(peer, endpoint);
		let result = tokio::time::timeout(self.send_timeout, self.try_send(&entry, bytes)).await;
		match result {
			Ok(Ok(())) => Ok(()),
			Ok(Err(e)) => {
				self.dispose(peer);
				Err(e)
			}
			Err(_) => {
				log::warn!(target: LOG_TARGET, "send to {} timed out after {:?}, disposing dealer", peer, self.send_timeout);
				self.dispose(peer);
				Err(TransportError::Timeout)
			}
		}
	}

	async fn try_send(&self, entry: &DealerEntry, bytes: Bytes) -> Result<()> {
		let mut guard = entry.conn.lock().await;
		if guard.is_none() {
			let stream = TcpStream::connect(entry.endpoint).await?;
			*guard = Some(frame(stream));
		}
		let framed = guard.as_mut().expect("just ensured Some");
		framed.send(bytes).await.map_err(TransportError::from)
	}

	fn get_or_create(&self, peer: PeerAddress, endpoint: SocketAddr) -> Arc<DealerEntry> {
		if let Some(existing) = self.entries.read().get(&peer) {
			return existing.clone();
		}
		let mut entries = self.entries.write();
		entries
			.entry(peer)
			.or_insert_with(|| Arc::new(DealerEntry { endpoint, conn: AsyncMutex::new(None) }))
			.clone()
	}

	/// Dispose of and remove the dealer for `peer`, if any.
	pub fn dispose(&self, peer: PeerAddress) {
		if self.entries.write().remove(&peer).is_some() {
			log::debug!(target: LOG_TARGET, "disposed dealer for {}", peer);
		}
	}

	/// Sweep every dealer whose address is no longer present in the
	/// routing table (`spec.md` §4.E, invariant 3 in §8). `keep` decides
	/// membership.
	pub fn sweep(&self, keep: impl Fn(&PeerAddress) -> bool) {
		let stale: Vec<PeerAddress> =
			self.entries.read().keys().filter(|addr| !keep(addr)).cloned().collect();
		for addr in stale {
			self.dispose(addr);
		}
	}
}

/// Open a one-shot dealer connection for a single request/reply exchange
/// (`spec.md` §4.F). Not pooled: the dispatcher's worker owns it for the
/// lifetime of one exchange and drops it afterwards.
pub async fn connect_one_shot(
	endpoint: SocketAddr,
) -> Result<tokio_util::codec::Framed<TcpStream, tokio_util::codec::LengthDelimitedCodec>> {
	let stream = TcpStream::connect(endpoint).await?;
	Ok(frame(stream))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn send_to_unreachable_peer_disposes_entry() {
		let pool = DealerPool::new(Duration::from_millis(200));
		let peer = PeerAddress([1u8; 32]);
		// Nothing is listening on this port; connect should fail quickly
		// and the pool should not retain the failed entry.
		let endpoint: SocketAddr = "127.0.0.1:1".parse().unwrap();
		let result = pool.send(peer, endpoint, Bytes::from_static(b"hello")).await;
		assert!(result.is_err());
		assert!(pool.is_empty());
	}

	#[test]
	fn sweep_removes_entries_the_table_no_longer_knows() {
		let pool = DealerPool::new(Duration::from_secs(3));
		let peer = PeerAddress([2u8; 32]);
		let endpoint: SocketAddr = "127.0.0.1:9".parse().unwrap();
		let _ = pool.get_or_create(peer, endpoint);
		assert_eq!(pool.len(), 1);
		pool.sweep(|_| false);
		assert_eq!(pool.len(), 0);
	}
}
