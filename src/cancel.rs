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

//! Cooperative cancellation (`spec.md` §5): "a single root cancellation
//! token is created on construction ... per-call cancellation tokens ...
//! compose with the root via `any`."

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct Inner {
	cancelled: AtomicBool,
	notify: Notify,
}

/// A cloneable cancellation signal. Cloning shares the same underlying
/// state; calling [`CancellationToken::cancel`] on any clone cancels all of
/// them.
#[derive(Clone)]
pub struct CancellationToken {
	inner: Arc<Inner>,
}

impl Default for CancellationToken {
	fn default() -> Self {
		CancellationToken { inner: Arc::new(Inner { cancelled: AtomicBool::new(false), notify: Notify::new() }) }
	}
}

impl CancellationToken {
	/// Create a fresh, not-yet-cancelled token.
	pub fn new() -> Self {
		Self::default()
	}

	/// Signal cancellation to every clone of this token.
	pub fn cancel(&self) {
		self.inner.cancelled.store(true, Ordering::SeqCst);
		self.inner.notify.notify_waiters();
	}

	/// Whether cancellation has already been signalled.
	pub fn is_cancelled(&self) -> bool {
		self.inner.cancelled.load(Ordering::SeqCst)
	}

	/// Resolve once cancellation is signalled.
	pub async fn cancelled(&self) {
		loop {
			if self.is_cancelled() {
				return;
			}
			let notified = self.inner.notify.notified();
			if self.is_cancelled() {
				return;
			}
			notified.await;
		}
	}
}

/// Compose two tokens so the result cancels as soon as either source does
/// (`spec.md` §5: per-call tokens compose with the root via `any`).
pub fn any(a: CancellationToken, b: CancellationToken) -> CancellationToken {
	let combined = CancellationToken::new();
	let combined_task = combined.clone();
	tokio::spawn(async move {
		tokio::select! {
			_ = a.cancelled() => {}
			_ = b.cancelled() => {}
		}
		combined_task.cancel();
	});
	combined
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn any_fires_when_either_source_cancels() {
		let root = CancellationToken::new();
		let per_call = CancellationToken::new();
		let combined = any(root.clone(), per_call.clone());
		assert!(!combined.is_cancelled());
		per_call.cancel();
		combined.cancelled().await;
		assert!(combined.is_cancelled());
	}
}
