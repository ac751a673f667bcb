//! Shared test fixtures: a toy `Signer`/`Verifier` pair and a helper for
//! spinning up an in-process `Transport` bound to an ephemeral port.
//!
//! Integration tests can't reach `sc_network_transport::test_support`
//! (it's `#[cfg(test)]`-gated to the library's own unit-test build), so
//! this is a deliberate, minimal duplicate of that toy scheme.

use sc_network_transport::config::TransportConfig;
use sc_network_transport::peer::{AppProtocolVersion, PublicKey, Signature, Signer, Verifier};
use sc_network_transport::Transport;
use std::sync::Arc;

fn toy_mac(key: &[u8], data: &[u8]) -> Vec<u8> {
	let mut state: u64 = 0xcbf29ce484222325 ^ key.len() as u64;
	for &byte in key.iter().chain(data.iter()) {
		state ^= byte as u64;
		state = state.wrapping_mul(0x100000001b3);
	}
	state.to_le_bytes().to_vec()
}

#[derive(Clone)]
pub struct KeyPair {
	id: u8,
}

impl KeyPair {
	pub fn generate(id: u8) -> Self {
		KeyPair { id }
	}

	pub fn public_key(&self) -> PublicKey {
		PublicKey(vec![self.id])
	}
}

impl Signer for KeyPair {
	fn sign(&self, data: &[u8]) -> Signature {
		Signature(toy_mac(&[self.id], data))
	}

	fn public_key(&self) -> PublicKey {
		KeyPair::public_key(self)
	}
}

impl Verifier for KeyPair {
	fn verify(&self, key: &PublicKey, data: &[u8], signature: &Signature) -> bool {
		toy_mac(&key.0, data) == signature.0
	}
}

/// Build and `start` a transport bound to `127.0.0.1:0`, identified by
/// `keys` and advertising `app_version`.
pub async fn spawn_transport(keys: &KeyPair, app_version: u32) -> Transport {
	let config = TransportConfig::builder()
		.host("127.0.0.1".parse().unwrap(), 0)
		.identity(Arc::new(keys.clone()), Arc::new(keys.clone()))
		.app_protocol_version(AppProtocolVersion::signed(app_version, vec![], keys))
		.build()
		.expect("valid config");
	let transport = Transport::new(config);
	transport.start().await.expect("start should succeed on an ephemeral port");
	transport
}
