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

//! The outer wire framing shared by the router socket and dealer pool.
//!
//! One logical [`crate::codec::WireMessage`] is carried per outer frame.
//! This plays the role that a true ZeroMQ ROUTER/DEALER multipart socket
//! plays in the source: a length-delimited frame boundary, built here on
//! plain `tokio` TCP streams with `tokio_util`'s length-delimited codec
//! rather than an external messaging library.

use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Maximum size of one framed message. Generous enough for `Neighbors`
/// replies carrying a full bucket's worth of peers; guards against a
/// misbehaving peer claiming an unbounded frame length.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Wrap a [`TcpStream`] in the shared length-delimited framing.
pub fn frame(stream: TcpStream) -> Framed<TcpStream, LengthDelimitedCodec> {
	let codec = LengthDelimitedCodec::builder()
		.max_frame_length(MAX_FRAME_LEN)
		.length_field_length(4)
		.new_codec();
	Framed::new(stream, codec)
}
