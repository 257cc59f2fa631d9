//! Outgoing header handling
//!
//! - [`OutgoingHeaders`]: the mutable, case-insensitive header set of a message
//!   - original casing kept for the wire
//!   - scalar and multi-valued fields ([`FieldValue`])
//!   - validation of names and values on every mutation
//!
//! - Header assembly: turns a first line plus a header source ([`HeaderSource`]) into the
//!   committed header block and settles connection persistence and body framing

mod assembly;
mod collection;

pub use assembly::HeaderSource;
pub use collection::FieldValue;
pub use collection::OutgoingHeaders;

pub(crate) use assembly::{AssemblyContext, Framing, assemble};
pub(crate) use collection::coalesce_header_map;
