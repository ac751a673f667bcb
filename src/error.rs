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

//! The error kinds produced anywhere in this crate.

use crate::peer::{AppProtocolVersion, PeerAddress};

/// Unified error type for the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
	/// The codec rejected a frame sequence: wrong frame count, bad version
	/// frame or a signature that did not verify.
	#[error("invalid message: {0}")]
	InvalidMessage(String),

	/// The sender's `AppProtocolVersion` is not compatible with ours.
	#[error("peer {peer} runs an incompatible protocol version (ours: {ours}, theirs: {theirs})")]
	DifferentAppProtocolVersion {
		/// The peer whose version did not match.
		peer: PeerAddress,
		/// Our own version.
		ours: u32,
		/// The version the peer advertised.
		theirs: u32,
	},

	/// A network call did not complete within its deadline.
	#[error("operation timed out")]
	Timeout,

	/// The operation was cooperatively cancelled.
	#[error("operation was cancelled")]
	Cancelled,

	/// An operation was invoked before [`crate::Transport::run`] completed.
	#[error("transport has not finished starting up")]
	NoSwarmContext,

	/// [`crate::Transport::start`] or [`crate::Transport::run`] was called
	/// while already running.
	#[error("transport is already running")]
	AlreadyRunning,

	/// A socket-level I/O failure.
	#[error("socket error: {0}")]
	SocketError(String),

	/// Anything else, with context for the log line that raised it.
	#[error("unexpected error: {0}")]
	Unexpected(String),
}

impl From<std::io::Error> for TransportError {
	fn from(e: std::io::Error) -> Self {
		TransportError::SocketError(e.to_string())
	}
}

impl TransportError {
	/// True for errors the dispatcher's worker loop should retry, per
	/// `spec.md` §7 ("any exception ... except cancellation triggers retry").
	pub fn is_retryable(&self) -> bool {
		!matches!(self, TransportError::Cancelled)
	}
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TransportError>;

/// A peer advertised an incompatible `AppProtocolVersion`; carried alongside
/// the peer's claimed version so the `different_version_callback` can be
/// invoked with the same information the caller receives.
#[derive(Debug, Clone)]
pub struct VersionMismatch {
	/// Address of the mismatched peer.
	pub peer: PeerAddress,
	/// Our own advertised version.
	pub expected: AppProtocolVersion,
	/// The version claimed by the remote peer.
	pub actual: AppProtocolVersion,
}
