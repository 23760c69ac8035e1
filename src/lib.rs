// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enclave Bridge - Attested Channel and Network Relay
//!
//! This crate lets a client talk confidentially to code running in an
//! isolated enclave, and lets that enclave reach the internet through a
//! host-side relay that never terminates TLS.
//!
//! ## Modules
//!
//! - `crypto` - secp256k1 key exchange, AES-256-GCM, ECDSA signatures
//! - `attestation` - attestation documents, local authority, verifier
//! - `channel` - client and server ends of the secure channel
//! - `executor` / `providers` - what the enclave does with a decrypted task
//! - `relay` - SNI-routed network relay and loopback forwarder
//! - `api` - HTTP API handlers (Axum)
//! - `workflow` - multi-stage research flow over one channel

pub mod api;
pub mod attestation;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod executor;
pub mod providers;
pub mod relay;
pub mod state;
pub mod telemetry;
pub mod workflow;
