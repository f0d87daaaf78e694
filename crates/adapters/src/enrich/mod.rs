//! Synchronous flow enrichers.

pub mod cidr_enricher;
