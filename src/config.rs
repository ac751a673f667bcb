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

//! Transport configuration (`spec.md` §6 external interfaces, ambient
//! surface added by `SPEC_FULL.md` §6).

use crate::gate::DifferentVersionCallback;
use crate::peer::{AppProtocolVersion, PublicKey, Signer, Verifier};
use crate::supervisor::ProcessMessageHandler;
use crate::turn::client::{TurnClient, TurnServerConfig};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Validated configuration for a [`crate::Transport`].
pub struct TransportConfig {
	/// Local bind address; `None` means TURN relay only.
	pub host: Option<IpAddr>,
	/// Local listen port, or 0 for an ephemeral port.
	pub listen_port: u16,
	/// ICE/TURN server config, required when `host` is `None`.
	pub turn: Option<TurnServerConfig>,
	/// Lifetime requested for the TURN allocation and refreshed
	/// `ALLOCATION_REFRESH_MARGIN` before expiry (`spec.md` §4.C).
	pub allocation_lifetime: Duration,
	/// Number of request-dispatcher worker tasks.
	pub workers: usize,
	/// Number of routing-table buckets.
	pub table_size: usize,
	/// Capacity of each routing-table bucket.
	pub bucket_size: usize,
	/// This node's own signer (for outbound message signatures).
	pub signer: Arc<dyn Signer>,
	/// Verifier used to check inbound message signatures.
	pub verifier: Arc<dyn Verifier>,
	/// Our own app-protocol version.
	pub app_protocol_version: AppProtocolVersion,
	/// Signers trusted even on a version mismatch.
	pub trusted_signers: HashSet<PublicKey>,
	/// Invoked whenever `validate_sender` rejects a peer's version.
	pub on_different_version: DifferentVersionCallback,
	/// How old a bucket's freshest member may get before `refresh_table`
	/// performs a random-ID lookup in its range.
	pub table_refresh_max_age: Duration,
	/// Invoked for every inbound `MessageBody::User` message that passes
	/// the version gate (`spec.md` §6 constructor input
	/// `process_message_handler`).
	pub process_message_handler: ProcessMessageHandler,
}

/// Builder for [`TransportConfig`], validating the invariants `spec.md`
/// §6 implies ("if host is absent, TURN is required").
pub struct TransportConfigBuilder {
	host: Option<IpAddr>,
	listen_port: u16,
	turn: Option<TurnServerConfig>,
	allocation_lifetime: Duration,
	workers: usize,
	table_size: usize,
	bucket_size: usize,
	signer: Option<Arc<dyn Signer>>,
	verifier: Option<Arc<dyn Verifier>>,
	app_protocol_version: Option<AppProtocolVersion>,
	trusted_signers: HashSet<PublicKey>,
	on_different_version: Option<DifferentVersionCallback>,
	table_refresh_max_age: Duration,
	process_message_handler: Option<ProcessMessageHandler>,
}

impl Default for TransportConfigBuilder {
	fn default() -> Self {
		TransportConfigBuilder {
			host: None,
			listen_port: 0,
			turn: None,
			allocation_lifetime: TurnClient::default_lifetime(),
			workers: 4,
			table_size: 256,
			bucket_size: 20,
			signer: None,
			verifier: None,
			app_protocol_version: None,
			trusted_signers: HashSet::new(),
			on_different_version: None,
			table_refresh_max_age: Duration::from_secs(60 * 60),
			process_message_handler: None,
		}
	}
}

impl TransportConfigBuilder {
	/// Start a builder with the documented defaults.
	pub fn new() -> Self {
		Self::default()
	}

	/// Bind locally to `host`, listening on `port` (0 = ephemeral).
	pub fn host(mut self, host: IpAddr, port: u16) -> Self {
		self.host = Some(host);
		self.listen_port = port;
		self
	}

	/// Configure TURN/ICE relay servers, required when no `host` is set.
	pub fn turn(mut self, turn: TurnServerConfig) -> Self {
		self.turn = Some(turn);
		self
	}

	/// Override the default TURN allocation lifetime (`spec.md` §6: default
	/// 777s).
	pub fn allocation_lifetime(mut self, lifetime: Duration) -> Self {
		self.allocation_lifetime = lifetime;
		self
	}

	/// Number of request-dispatcher workers (`spec.md` §4.F).
	pub fn workers(mut self, workers: usize) -> Self {
		self.workers = workers;
		self
	}

	/// Number of routing-table buckets (`spec.md` §3).
	pub fn table_size(mut self, table_size: usize) -> Self {
		self.table_size = table_size;
		self
	}

	/// Capacity of each routing-table bucket (`spec.md` §3).
	pub fn bucket_size(mut self, bucket_size: usize) -> Self {
		self.bucket_size = bucket_size;
		self
	}

	/// This node's signer and its matching verifier.
	pub fn identity(mut self, signer: Arc<dyn Signer>, verifier: Arc<dyn Verifier>) -> Self {
		self.signer = Some(signer);
		self.verifier = Some(verifier);
		self
	}

	/// Our own app-protocol version descriptor.
	pub fn app_protocol_version(mut self, version: AppProtocolVersion) -> Self {
		self.app_protocol_version = Some(version);
		self
	}

	/// Add a signer trusted even on a version mismatch (`spec.md` §3).
	pub fn trust_signer(mut self, key: PublicKey) -> Self {
		self.trusted_signers.insert(key);
		self
	}

	/// Callback invoked on every version-gate rejection.
	pub fn on_different_version(mut self, callback: DifferentVersionCallback) -> Self {
		self.on_different_version = Some(callback);
		self
	}

	/// Override the default bucket staleness threshold.
	pub fn table_refresh_max_age(mut self, max_age: Duration) -> Self {
		self.table_refresh_max_age = max_age;
		self
	}

	/// Callback invoked for every inbound `MessageBody::User` message that
	/// passes the version gate (`spec.md` §6 `process_message_handler`).
	pub fn process_message_handler(mut self, handler: ProcessMessageHandler) -> Self {
		self.process_message_handler = Some(handler);
		self
	}

	/// Validate and build the final configuration.
	pub fn build(self) -> Result<TransportConfig, String> {
		if self.workers < 1 {
			return Err("workers must be >= 1".into());
		}
		if self.table_size < 1 {
			return Err("table_size must be >= 1".into());
		}
		if self.bucket_size < 1 {
			return Err("bucket_size must be >= 1".into());
		}
		if self.host.is_none() && self.turn.is_none() {
			return Err("at least one of host or turn (ice_servers) is required".into());
		}
		let signer = self.signer.ok_or("identity() is required")?;
		let verifier = self.verifier.ok_or("identity() is required")?;
		let app_protocol_version = self.app_protocol_version.ok_or("app_protocol_version() is required")?;
		let on_different_version = self.on_different_version.unwrap_or_else(|| Arc::new(|_| {}));
		let process_message_handler = self.process_message_handler.unwrap_or_else(|| Arc::new(|_| {}));

		Ok(TransportConfig {
			host: self.host,
			listen_port: self.listen_port,
			turn: self.turn,
			allocation_lifetime: self.allocation_lifetime,
			workers: self.workers,
			table_size: self.table_size,
			bucket_size: self.bucket_size,
			signer,
			verifier,
			app_protocol_version,
			trusted_signers: self.trusted_signers,
			on_different_version,
			table_refresh_max_age: self.table_refresh_max_age,
			process_message_handler,
		})
	}
}

impl TransportConfig {
	/// Start building a configuration with the documented defaults.
	pub fn builder() -> TransportConfigBuilder {
		TransportConfigBuilder::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::KeyPair;

	#[test]
	fn build_fails_without_host_or_turn() {
		let keys = KeyPair::generate(1);
		let result = TransportConfig::builder()
			.identity(Arc::new(keys.clone()), Arc::new(keys.clone()))
			.app_protocol_version(AppProtocolVersion::signed(1, vec![], &keys))
			.build();
		assert!(result.is_err());
	}

	#[test]
	fn build_succeeds_with_host() {
		let keys = KeyPair::generate(1);
		let result = TransportConfig::builder()
			.host("127.0.0.1".parse().unwrap(), 0)
			.identity(Arc::new(keys.clone()), Arc::new(keys.clone()))
			.app_protocol_version(AppProtocolVersion::signed(1, vec![], &keys))
			.build();
		assert!(result.is_ok());
	}

	#[test]
	fn build_rejects_zero_workers() {
		let keys = KeyPair::generate(1);
		let result = TransportConfig::builder()
			.host("127.0.0.1".parse().unwrap(), 0)
			.workers(0)
			.identity(Arc::new(keys.clone()), Arc::new(keys.clone()))
			.app_protocol_version(AppProtocolVersion::signed(1, vec![], &keys))
			.build();
		assert!(result.is_err());
	}
}
