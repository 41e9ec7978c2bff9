//! Conditional-request validator service.
//!
//! Serves user records over HTTP with entity-tag validators. A shared
//! validator cache lets conditional reads be answered without touching the
//! repository; writes commit first and then invalidate the cached validator.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
