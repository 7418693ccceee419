//! HTTP layer for the inventory service.
//!
//! Exposes the lock-guarded consume endpoint plus the usual health and
//! metrics routes.  Two processes pointed at the same Redis and listening on
//! different ports contend for the same distributed lock.

pub mod handler;
