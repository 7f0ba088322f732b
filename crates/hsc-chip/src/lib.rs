//! Silicon model for the UniPhier High-speed Stream Controller (HSC).
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the controller: register offsets and bit fields, port and
//! channel numbering, the per-SoC descriptor tables and board routing.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | Register map: offsets, indexed blocks, bit definitions |
//! | [`ports`] | CSS port, TS lane, DMA channel and DPLL numbering |
//! | [`spec`] | Descriptor types and [`SocVariant`] |
//! | [`variants`] | LD11 / LD20 tables |
//! | [`board`] | Board routing presets |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod board;
pub mod ports;
pub mod regs;
pub mod spec;
pub mod variants;

pub use board::{Board, HscConf};
pub use spec::{HscSpec, SocVariant};

/// Transport stream packet size.
pub const TS_PACKET_SIZE: usize = 188;

/// M2TS packet size: a 4-byte arrival timestamp followed by a TS packet.
pub const M2TS_PACKET_SIZE: usize = 192;

/// Arrival timestamp prefix length of an M2TS packet.
pub const M2TS_TIMESTAMP_SIZE: usize = M2TS_PACKET_SIZE - TS_PACKET_SIZE;
