//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate records, relations and stores into use-case level APIs.
//! - Keep CLI layers decoupled from storage details.

pub mod cascade_service;
