//! Defab Core -- a discrete-event simulation engine for disassembly
//! factories.
//!
//! Products arrive at an incoming storage, travel by vehicle between
//! disassembly stations that strip them component by component, and leave
//! through an outgoing storage as detached parts and exhausted remainders.
//! The engine advances a future event list in simulated minutes; nothing
//! polls, every wait has a matching wake-up.
//!
//! # Event Loop
//!
//! [`engine::Engine::run`] pops `(time, seq)`-ordered wakes off a binary heap
//! until the configured horizon. Ties at the same instant fire in scheduling
//! order, which combined with the five seeded random streams makes a run
//! fully reproducible: two runs with the same configuration render
//! byte-identical event logs.
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- Owns the world and the event loop.
//! - [`config::FactoryConfig`] -- The serde document a run is built from.
//! - [`validation::Blueprint`] -- The validated, interned form of a config.
//! - [`product::VariantTemplate`] -- A variant's flattened component arena.
//! - [`station::Station`] -- Five-state station with a time ledger and a
//!   finer-grained work phase.
//! - [`storage::StorageNode`] -- Buffered storage with relay stages between
//!   its zones.
//! - [`vehicle::Vehicle`] -- FIFO-order transport with capacity in transport
//!   units.
//! - [`rng::Streams`] -- Five independent SplitMix64 streams, one per
//!   stochastic concern.
//! - [`event::EventSink`] -- Receives every observable state transition.

pub mod config;
pub mod engine;
pub mod event;
pub mod id;
pub mod product;
pub mod reliability;
pub mod resource;
pub mod rng;
pub mod scheduler;
pub mod source;
pub mod station;
pub mod storage;
pub mod time;
pub mod validation;
pub mod vehicle;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
