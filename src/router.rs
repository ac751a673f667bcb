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

//! Router socket (`spec.md` §4.D): one bound inbound endpoint receiving
//! frames addressed by peer identity.

use crate::error::{Result, TransportError};
use crate::wire::frame;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const LOG_TARGET: &str = "sc-transport::router";

/// The opaque routing token the router assigns to each inbound connection,
/// so a later reply can be steered back to the same peer (`spec.md` §3:
/// "identity ... set by the router on inbound").
pub type Identity = Vec<u8>;

/// One inbound frame paired with the identity it arrived on.
pub struct Inbound {
	/// The connection's assigned identity.
	pub identity: Identity,
	/// The raw (still codec-encoded) frame bytes.
	pub bytes: Bytes,
}

/// The router socket: binds one TCP listener and multiplexes every accepted
/// connection's frames onto a single inbound channel, and every outbound
/// reply by identity back to its owning connection.
pub struct RouterSocket {
	local_addr: SocketAddr,
	next_id: AtomicU64,
	connections: Arc<RwLock<HashMap<Identity, mpsc::UnboundedSender<Bytes>>>>,
	inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
	inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl RouterSocket {
	/// Bind a router socket on `listen_port`, or an ephemeral port if 0.
	pub async fn bind(host: std::net::IpAddr, listen_port: u16) -> Result<(Self, Arc<TcpListener>)> {
		let listener = TcpListener::bind((host, listen_port)).await?;
		let local_addr = listener.local_addr()?;
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let socket = RouterSocket {
			local_addr,
			next_id: AtomicU64::new(0),
			connections: Arc::new(RwLock::new(HashMap::new())),
			inbound_rx: tokio::sync::Mutex::new(inbound_rx),
			inbound_tx,
		};
		Ok((socket, Arc::new(listener)))
	}

	/// The address this router ended up bound to (useful when `listen_port`
	/// was 0).
	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	/// Accept loop: spawned once by the lifecycle supervisor. Runs until
	/// the listener itself errors (connection-level errors are logged and
	/// do not tear down the loop).
	pub async fn accept_loop(self: Arc<Self>, listener: Arc<TcpListener>) {
		loop {
			match listener.accept().await {
				Ok((stream, peer_addr)) => {
					let identity = self.next_id.fetch_add(1, Ordering::Relaxed).to_be_bytes().to_vec();
					log::debug!(target: LOG_TARGET, "accepted connection {:?} from {}", identity, peer_addr);
					let (write_tx, write_rx) = mpsc::unbounded_channel();
					self.connections.write().insert(identity.clone(), write_tx);
					let this = self.clone();
					tokio::spawn(this.serve_connection(identity, stream, write_rx));
				}
				Err(e) => {
					log::error!(target: LOG_TARGET, "router listener failed: {}", e);
					break;
				}
			}
		}
	}

	async fn serve_connection(
		self: Arc<Self>,
		identity: Identity,
		stream: tokio::net::TcpStream,
		mut write_rx: mpsc::UnboundedReceiver<Bytes>,
	) {
		let mut framed = frame(stream);
		loop {
			tokio::select! {
				inbound = framed.next() => {
					match inbound {
						Some(Ok(bytes)) => {
							let _ = self.inbound_tx.send(Inbound { identity: identity.clone(), bytes: bytes.freeze() });
						}
						Some(Err(e)) => {
							log::warn!(target: LOG_TARGET, "connection {:?} read error: {}", identity, e);
							break;
						}
						None => {
							log::debug!(target: LOG_TARGET, "connection {:?} closed by peer", identity);
							break;
						}
					}
				}
				outbound = write_rx.recv() => {
					match outbound {
						Some(bytes) => {
							if let Err(e) = framed.send(bytes).await {
								log::warn!(target: LOG_TARGET, "connection {:?} write error: {}", identity, e);
								break;
							}
						}
						None => break,
					}
				}
			}
		}
		self.connections.write().remove(&identity);
	}

	/// Drain every frame currently queued, invoking `handler` for each.
	/// Errors raised by `handler` are logged and never stop the drain
	/// (`spec.md` §4.D: "Errors in one message never propagate out of the
	/// drain loop").
	pub async fn drain_once<F>(&self, mut handler: F)
	where
		F: FnMut(Identity, Bytes),
	{
		let mut rx = self.inbound_rx.lock().await;
		// Block for at least one message, then drain everything already
		// queued without waiting further — "drains all pending ... in one
		// go" (`spec.md` §4.D).
		match rx.recv().await {
			Some(Inbound { identity, bytes }) => handler(identity, bytes),
			None => return,
		}
		while let Ok(Inbound { identity, bytes }) = rx.try_recv() {
			handler(identity, bytes);
		}
	}

	/// Send a reply to the connection owning `identity`. The connection's
	/// write queue is unbounded, so the only failure mode is the peer
	/// having already disconnected; `spec.md` §4.F still models this path
	/// as a short try-send whose failures are logged, not retried — the
	/// caller (the reply-queue consumer) is responsible for that logging.
	pub fn reply(&self, identity: &Identity, bytes: Bytes) -> Result<()> {
		let sender = self
			.connections
			.read()
			.get(identity)
			.cloned()
			.ok_or_else(|| TransportError::SocketError(format!("no connection for identity {:?}", identity)))?;
		sender
			.send(bytes)
			.map_err(|_| TransportError::SocketError("reply channel closed".into()))
	}

	/// Number of currently open inbound connections.
	pub fn connection_count(&self) -> usize {
		self.connections.read().len()
	}
}
