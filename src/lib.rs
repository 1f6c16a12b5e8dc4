//! Supervised Ethereum staking node runner.
//!
//! `stakerd` owns the lifecycle of a fixed pipeline of long-running child
//! processes — execution client, consensus client, validator client,
//! mev-boost, and an optional VPN tunnel. It multiplexes their output into
//! a single log stream, watches for fatal lines, escalates shutdown
//! signals in tiers, and coordinates pause/resume with an external
//! snapshot subsystem so a volume snapshot never sees live on-disk state.

pub mod cli;
pub mod command;
pub mod config;
pub mod detector;
pub mod environment;
pub mod escalate;
pub mod mux;
pub mod node;
pub mod paths;
pub mod process;
pub mod relay;
pub mod snapshot;
pub mod tunnel;
