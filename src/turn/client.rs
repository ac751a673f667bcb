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

//! `TurnClient` (`spec.md` §4.C): wraps `turn::client::Client` and
//! `stun::client::Client` with the refresh-loop/permission-reissue policy.
//! RFC framing, transaction retries and STUN attribute encoding are left
//! entirely to the `turn`/`stun` crates; this module only owns the policy
//! `spec.md` layers on top: "refresh one minute early" and "dispose and
//! re-create on socket error."

use crate::error::{Result, TransportError};
use parking_lot::Mutex as SyncMutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use stun::client::Client as StunClient;
use tokio::net::UdpSocket;
use turn::client::{Client as InnerClient, ClientConfig};
use turn::relay_conn::RelayConn;

const LOG_TARGET: &str = "sc-transport::turn";

/// How much earlier than `allocation_lifetime` a refresh is attempted
/// (`spec.md` §3 TURN State: "refresh must occur strictly before `now +
/// lifetime`; the implementation refreshes one minute early").
pub const ALLOCATION_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Default allocation lifetime (`spec.md` §6: "Allocation lifetime default
/// 777 s").
pub const DEFAULT_ALLOCATION_LIFETIME: Duration = Duration::from_secs(777);

struct Inner {
	client: Arc<InnerClient>,
	relay: Arc<RelayConn>,
	relay_endpoint: SocketAddr,
}

/// Credentials and server list used to (re-)create the inner `turn` client.
#[derive(Clone)]
pub struct TurnServerConfig {
	/// Candidate TURN/STUN server endpoints, tried in order.
	pub ice_servers: Vec<SocketAddr>,
	/// TURN long-term-credential username.
	pub username: String,
	/// TURN long-term-credential password.
	pub password: String,
	/// TURN realm, required by the long-term-credential mechanism.
	pub realm: String,
}

/// A disposable-and-recreatable handle onto the active TURN allocation
/// (`spec.md` §4.C: "the client is disposed and re-created from the ICE
/// server list" on socket error).
pub struct TurnClient {
	config: TurnServerConfig,
	inner: SyncMutex<Option<Inner>>,
}

impl TurnClient {
	/// `create_turn_client(ice_servers)` (`spec.md` §4.C): builds a client
	/// with no allocation yet — the allocation is created lazily by
	/// [`TurnClient::allocate_request`] so construction never touches the
	/// network.
	pub fn new(config: TurnServerConfig) -> Self {
		TurnClient { config, inner: SyncMutex::new(None) }
	}

	async fn connect(&self) -> Result<Arc<InnerClient>> {
		let server = *self
			.config
			.ice_servers
			.first()
			.ok_or_else(|| TransportError::Unexpected("no ICE servers configured".into()))?;
		let conn = UdpSocket::bind("0.0.0.0:0").await?;
		conn.connect(server).await?;

		let client = InnerClient::new(ClientConfig {
			stun_serv_addr: server.to_string(),
			turn_serv_addr: server.to_string(),
			username: self.config.username.clone(),
			password: self.config.password.clone(),
			realm: self.config.realm.clone(),
			software: String::new(),
			rto_in_ms: 0,
			conn: Arc::new(conn),
			vnet: None,
		})
		.await
		.map_err(|e| TransportError::SocketError(format!("turn client setup failed: {}", e)))?;

		client.listen().await.map_err(|e| TransportError::SocketError(format!("turn listen failed: {}", e)))?;
		Ok(Arc::new(client))
	}

	/// `get_mapped_address()` (`spec.md` §4.C): our server-reflexive
	/// address, from a one-off STUN binding request against the first
	/// configured server.
	pub async fn get_mapped_address(&self) -> Result<SocketAddr> {
		let server = *self
			.config
			.ice_servers
			.first()
			.ok_or_else(|| TransportError::Unexpected("no ICE servers configured".into()))?;
		let conn = UdpSocket::bind("0.0.0.0:0").await?;
		conn.connect(server).await?;
		let mut stun_client = StunClient::new(stun::client::ClientConfig {
			conn: Arc::new(conn),
			software: None,
			rto: None,
		});
		stun_client
			.binding_request(server)
			.await
			.map_err(|e| TransportError::SocketError(format!("stun binding request failed: {}", e)))
	}

	/// `is_behind_nat()` (`spec.md` §4.C): true iff the mapped address
	/// differs from every local interface address.
	pub async fn is_behind_nat(&self, local_addrs: &[IpAddr]) -> Result<bool> {
		let mapped = self.get_mapped_address().await?;
		Ok(!local_addrs.contains(&mapped.ip()))
	}

	/// `allocate_request(lifetime)` (`spec.md` §4.C): reserves a relay
	/// address, (re)creating the inner client if necessary.
	pub async fn allocate_request(&self, lifetime: Duration) -> Result<SocketAddr> {
		let client = self.connect().await?;
		let relay = client
			.allocate()
			.await
			.map_err(|e| TransportError::SocketError(format!("turn allocate failed: {}", e)))?;
		let relay_endpoint = relay
			.local_addr()
			.map_err(|e| TransportError::SocketError(format!("relay has no local address: {}", e)))?;

		log::debug!(target: LOG_TARGET, "allocated relay endpoint {} (lifetime {:?})", relay_endpoint, lifetime);
		*self.inner.lock() = Some(Inner { client, relay: Arc::new(relay), relay_endpoint });
		Ok(relay_endpoint)
	}

	/// `refresh_allocation(lifetime)` (`spec.md` §4.C): extends the
	/// reservation. On socket error the client is disposed so the next call
	/// re-creates it from the ICE server list, matching the refresh-loop
	/// policy in `spec.md` §4.C.
	pub async fn refresh_allocation(&self, lifetime: Duration) -> Result<Duration> {
		let relay = {
			let guard = self.inner.lock();
			guard.as_ref().map(|i| i.relay.clone())
		};
		let relay = relay.ok_or(TransportError::NoSwarmContext)?;

		match relay.refresh(lifetime).await {
			Ok(granted) => Ok(granted),
			Err(e) => {
				log::warn!(target: LOG_TARGET, "refresh_allocation failed, disposing client: {}", e);
				*self.inner.lock() = None;
				Err(TransportError::SocketError(e.to_string()))
			}
		}
	}

	/// `create_permission(peer_endpoint, cancel_token)` (`spec.md` §4.C):
	/// authorizes inbound traffic from `peer_endpoint` through the relay.
	/// If `peer_endpoint` is a loopback address (test-fixture case), the
	/// relay-mapped address is substituted instead (`spec.md` §4.C
	/// Permission policy).
	pub async fn create_permission(
		&self,
		peer_endpoint: SocketAddr,
		cancel: crate::cancel::CancellationToken,
	) -> Result<()> {
		let relay = {
			let guard = self.inner.lock();
			guard.as_ref().map(|i| i.relay.clone())
		};
		let relay = relay.ok_or(TransportError::NoSwarmContext)?;

		let target = if peer_endpoint.ip().is_loopback() {
			let mapped = self.get_mapped_address().await?;
			SocketAddr::new(mapped.ip(), peer_endpoint.port())
		} else {
			peer_endpoint
		};

		tokio::select! {
			result = relay.create_permission(target) => {
				result.map_err(|e| TransportError::SocketError(format!("create_permission failed: {}", e)))
			}
			_ = cancel.cancelled() => Err(TransportError::Cancelled),
		}
	}

	/// `bind_proxies(local_port, cancel_token)` (`spec.md` §4.C): long-running
	/// task relaying bytes between the TURN relay connection and a local TCP
	/// listen port, until `cancel` fires.
	pub async fn bind_proxies(&self, local_port: u16, cancel: crate::cancel::CancellationToken) -> Result<()> {
		let (relay, relay_endpoint) = {
			let guard = self.inner.lock();
			match guard.as_ref() {
				Some(inner) => (inner.relay.clone(), inner.relay_endpoint),
				None => return Err(TransportError::NoSwarmContext),
			}
		};

		let listener = tokio::net::TcpListener::bind(("0.0.0.0", local_port)).await?;
		log::info!(target: LOG_TARGET, "proxying local port {} to relay {}", local_port, relay_endpoint);

		loop {
			tokio::select! {
				accepted = listener.accept() => {
					match accepted {
						Ok((stream, addr)) => {
							log::debug!(target: LOG_TARGET, "proxying {} through relay {}", addr, relay_endpoint);
							let relay = relay.clone();
							tokio::spawn(proxy_one(stream, relay));
						}
						Err(e) => log::warn!(target: LOG_TARGET, "proxy accept error: {}", e),
					}
				}
				_ = cancel.cancelled() => {
					log::debug!(target: LOG_TARGET, "bind_proxies cancelled");
					return Ok(());
				}
			}
		}
	}

	/// Default allocation lifetime requested when none is specified
	/// (`spec.md` §6).
	pub fn default_lifetime() -> Duration {
		DEFAULT_ALLOCATION_LIFETIME
	}
}

async fn proxy_one(mut stream: tokio::net::TcpStream, relay: Arc<RelayConn>) {
	let mut buf = vec![0u8; 64 * 1024];
	loop {
		tokio::select! {
			read = tokio::io::AsyncReadExt::read(&mut stream, &mut buf) => {
				match read {
					Ok(0) | Err(_) => return,
					Ok(n) => {
						if relay.send(&buf[..n]).await.is_err() {
							return;
						}
					}
				}
			}
			received = relay.recv() => {
				match received {
					Ok(data) if tokio::io::AsyncWriteExt::write_all(&mut stream, &data).await.is_ok() => {}
					_ => return,
				}
			}
		}
	}
}
