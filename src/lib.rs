//! tradesim: deterministic backtesting simulation core.
//!
//! Hexagonal architecture: the replay engine, portfolio accounting and
//! metrics live in [`domain`], port traits in [`ports`], concrete
//! implementations in [`adapters`], and the `tradesim` binary's command
//! handling in [`cli`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
