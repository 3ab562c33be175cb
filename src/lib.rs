//! Purpose: Client library for a key-value configuration service, used by the `kvconfig` CLI and tests.
//! Exports: `api` (client surface), `core` (settings, codec, errors, buffers), `pipeline` (policies, transports).
//! Role: Decodes service documents and delivers calls through a policy pipeline.
//! Invariants: Decoding is synchronous and allocation-bounded; transports own all I/O.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod pipeline;
