//! Workspace umbrella crate.
//!
//! Carries no code of its own; it exists to host the cross-service
//! integration suites under `tests/integration/`, which drive the real
//! server and client libraries against each other over TCP.
