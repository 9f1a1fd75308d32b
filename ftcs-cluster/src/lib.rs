//! Fault-tolerant replicated game state over QUIC.
//!
//! A set of peer nodes elects one master, replicates an Othello board from
//! that master to every member and serves the board to clients. Each module
//! focuses on a concrete responsibility:
//!
//! - [`identity`] generates the random node identities that order elections.
//! - [`board`] and [`message`] define the replicated value and the bincode
//!   wire protocol shared by peers and clients.
//! - [`transport`] abstracts multiplexed links, with a QUIC implementation
//!   and an in-memory network for tests.
//! - [`registry`] and [`state`] hold the per-node view of membership, the
//!   believed master and the replicated board.
//! - [`node`] runs the handshake, election, replication and recovery tasks.
//! - [`responder`] answers client requests on a separate listener.
//! - [`cli`], [`config`], [`runtime`] and [`client`] wire it all into the
//!   `ftcs` binary.
//!
//! Integration tests drive whole clusters over the in-memory transport.

pub mod board;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod message;
pub mod node;
pub mod registry;
pub mod responder;
pub mod runtime;
pub mod state;
pub mod transport;
