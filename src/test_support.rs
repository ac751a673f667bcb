// This file is part of Substrate.

// Copyright (C) 2021 Parity Technologies (UK) Ltd.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

//! Test-only stand-ins for the [`crate::peer::Signer`]/[`crate::peer::Verifier`]
//! capabilities this crate deliberately does not implement itself
//! (`spec.md` §1: cryptographic primitive implementation is out of scope).
//!
//! The scheme here is a toy fold, not a real signature algorithm: it exists
//! only so the codec, gate and dispatcher tests can exercise acceptance and
//! rejection without pulling in a real signing crate for tests alone.

use crate::peer::{PublicKey, Signature, Signer, Verifier};

fn toy_mac(key: &[u8], data: &[u8]) -> Vec<u8> {
	let mut state: u64 = 0xcbf29ce484222325 ^ key.len() as u64;
	for &byte in key.iter().chain(data.iter()) {
		state ^= byte as u64;
		state = state.wrapping_mul(0x100000001b3);
	}
	state.to_le_bytes().to_vec()
}

/// A deterministic test key pair identified by a small numeric id.
#[derive(Clone)]
pub struct KeyPair {
	id: u8,
}

impl KeyPair {
	/// Build a key pair for test id `id`. Distinct ids produce distinct
	/// public keys.
	pub fn generate(id: u8) -> Self {
		KeyPair { id }
	}

	/// This key pair's public key.
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

/// A verifier that accepts any well-formed signature produced by
/// [`KeyPair`]-style signers without restricting to one specific key.
pub struct NullVerifier;

impl Verifier for NullVerifier {
	fn verify(&self, key: &PublicKey, data: &[u8], signature: &Signature) -> bool {
		toy_mac(&key.0, data) == signature.0
	}
}
