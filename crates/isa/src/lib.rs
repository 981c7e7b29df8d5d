//! `clrx-isa` is the GCN instruction-set encoder/decoder, the "ISA codec" that
//! spec.md §6 treats as an opaque, pluggable collaborator. It is deliberately
//! small: a real deployment would swap in the full per-generation opcode tables
//! without touching any caller, since every caller only goes through
//! [`codec::encode`]/[`codec::decode`]/[`codec::max_encoded_size`].

#![deny(unused)]
#![deny(warnings)]
#![deny(clippy::all)]

pub mod codec;
pub mod defs;

pub use codec::{decode, encode, max_encoded_size, DecodedInstruction, FieldRef, IsaError, Operand, ParsedLine};
pub use defs::{pack_waitcnt, unpack_waitcnt, DelayOp, RegField, WaitCounter};
