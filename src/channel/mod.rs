// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Secure Channel
//!
//! Request/response protocol between a client and the enclave.
//!
//! ```text
//! client                                   server
//!   GET  /attestation  ------------------>
//!        <------------------  document | mock key
//!   verify, pin server key
//!   POST /talk {nonce, public_key, data = AEAD(canonical(task))}
//!                                          decrypt, execute
//!        <------------------  {data: result, sig: sign(canonical(result))}
//!   verify sig -> Trusted | Untrusted
//! ```

pub mod client;
pub mod server;
pub mod wire;

pub use client::{ChannelError, ChannelReply, ClientEndpoint, ClientOptions};
pub use server::{ServerAttestation, ServerEndpoint, TalkError};
pub use wire::{AttestationResponse, SignedReply, TalkReply, TalkRequest, TaskOutput, TaskRequest};
