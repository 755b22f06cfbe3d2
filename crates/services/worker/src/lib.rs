//! Distributed worker runtime for the database-coordinated job pool.
//!
//! This crate provides the worker component of the pool: each worker process
//! polls the shared `PostgreSQL` database for pending jobs, claims batches
//! atomically, executes them through registered handlers, and records the
//! results. Workers coordinate only through the database, enabling
//! horizontal scaling across machines without any inter-worker networking.
//!
//! The runtime also sweeps stale jobs left behind by crashed workers back
//! into the queue, sizes its default concurrency from detected machine
//! capabilities, and keeps a configured set of managed source files in sync
//! with the version published through the database, restarting itself when
//! they drift.

pub mod capability;
pub mod config;
pub mod handler;
pub mod service;
pub mod updater;
pub mod worker_id;

pub use self::{
    capability::MachineCapabilities,
    config::Config,
    handler::{EchoHandler, Handler, HandlerError, HandlerRegistry, JobOutput},
    service::{InitError, Outcome, Worker},
    updater::{UpdateCheck, Updater},
    worker_id::WorkerId,
};
