//! TCP plumbing: acceptor, per-client reader/writer tasks, and the upstream
//! reader/writer tasks. Grounded in the teacher's `socket::server` +
//! `socket::client_conn` split (accept loop announces connections to a
//! single core event channel; each connection gets its own reader task
//! decoding frames and a writer task draining an outbound channel).

pub mod client_conn;
pub mod listener;
pub mod upstream_conn;
