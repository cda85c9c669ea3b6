//! All integration tests for tessera

mod abr;
