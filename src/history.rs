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

//! Fixed-size message history ring (`spec.md` §3): the last `N = 30`
//! messages sent or received, kept for diagnostics (`trace()`).

use crate::peer::PeerAddress;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Instant;

/// Number of entries retained. Overwrites oldest on overflow.
pub const HISTORY_SIZE: usize = 30;

/// Direction a history entry was observed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
	/// The message was sent by this node.
	Sent,
	/// The message was received by this node.
	Received,
}

/// One entry in the message history.
#[derive(Clone, Debug)]
pub struct HistoryEntry {
	/// When the entry was recorded.
	pub at: Instant,
	/// Which direction it travelled.
	pub direction: Direction,
	/// The remote peer's address.
	pub peer: PeerAddress,
	/// The message kind's short name (`spec.md`'s `MessageBody::kind_name`).
	pub kind: &'static str,
}

/// A concurrent bounded ring of the last [`HISTORY_SIZE`] messages.
/// `spec.md` §5: "concurrent bounded queue; overflow drops the oldest."
pub struct MessageHistory {
	entries: Mutex<VecDeque<HistoryEntry>>,
}

impl Default for MessageHistory {
	fn default() -> Self {
		MessageHistory { entries: Mutex::new(VecDeque::with_capacity(HISTORY_SIZE)) }
	}
}

impl MessageHistory {
	/// Record a new entry, evicting the oldest if the ring is full.
	pub fn record(&self, direction: Direction, peer: PeerAddress, kind: &'static str) {
		let mut entries = self.entries.lock();
		if entries.len() == HISTORY_SIZE {
			entries.pop_front();
		}
		entries.push_back(HistoryEntry { at: Instant::now(), direction, peer, kind });
	}

	/// A snapshot of the current history, oldest first.
	pub fn snapshot(&self) -> Vec<HistoryEntry> {
		self.entries.lock().iter().cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn overwrites_oldest_on_overflow() {
		let history = MessageHistory::default();
		for i in 0..HISTORY_SIZE + 5 {
			history.record(Direction::Sent, PeerAddress([i as u8; 32]), "Ping");
		}
		let snapshot = history.snapshot();
		assert_eq!(snapshot.len(), HISTORY_SIZE);
		// The oldest surviving entry should be the 6th one ever recorded (index 5).
		assert_eq!(snapshot.first().unwrap().peer, PeerAddress([5u8; 32]));
	}
}
