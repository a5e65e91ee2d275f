//! frankenrouter — a line-oriented TCP message broker for a
//! flight-simulator network protocol.
//!
//! This crate is organized the way the router itself is described in its
//! design notes: a single core routing task ([`router`]) owns all mutable
//! state and is driven entirely by [`events::RouterEvent`]s sent in from
//! the acceptor, the per-connection reader/writer tasks ([`net`]), the
//! upstream supervisor, the FRDP tickers, the status ticker, and the HTTP
//! control surface ([`http`]).

pub mod access;
pub mod cache;
pub mod catalogue;
pub mod checks;
pub mod config;
pub mod error;
pub mod events;
pub mod filters;
pub mod frdp;
pub mod http;
pub mod message;
pub mod net;
pub mod router;
pub mod rules;
pub mod session;
pub mod stats;
pub mod status;
pub mod trafficlog;
