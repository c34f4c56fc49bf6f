//! Foreman - autonomous multi-agent task orchestrator.
//!
//! Accepts a free-text engineering request against a registered repository,
//! decomposes it into typed steps, drives each step with a role-specialized
//! generative agent, verifies every filesystem effect before believing it,
//! and streams state changes to observers in real time.
//!
//! Layering:
//! - `domain`: models, ports, and errors
//! - `services`: the orchestration kernel (engine, scheduler, verifier,
//!   event bus, lease sweeper)
//! - `infrastructure`: SQLite store, config, logging, generative client
//! - `api`: HTTP command endpoints and the per-task event stream
//! - `cli`: command-line surface

pub mod api;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
