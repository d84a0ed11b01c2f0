//! Integration tests for flowtest-core
//!
//! Tests are organized by feature:
//! - queue: bounded polling and delivery guarantees
//! - request_reply: correlated send/receive through an endpoint
//! - containers: nested control flow across actions and queues
//! - suite: suite runs, config files and reports

mod integration {
    pub mod common;

    mod containers;
    mod queue;
    mod request_reply;
    mod suite;
}
