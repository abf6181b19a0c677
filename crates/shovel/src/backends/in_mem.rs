//! 🧠 In-memory backends: no network, no disk, no heartbeat.
//!
//! [`InMemorySource`] drains a `Vec` of documents front to back. [`InMemorySink`] behaves
//! like a tiny index (key → document, overwrite on `index`, conflict on `create`) and
//! remembers every batch it was handed, so tests and dry runs can see exactly what arrived.
//!
//! ⚠️ Not for production. If you're deploying this to prod, please also deploy a therapist.

mod in_mem_sink;
mod in_mem_source;

pub use in_mem_sink::InMemorySink;
pub use in_mem_source::{InMemorySource, InMemorySourceConfig};
