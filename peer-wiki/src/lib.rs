//! HTTP server for the peer wiki.

pub mod api;
