// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::channel::ServerEndpoint;

/// Shared by every request. The endpoint is immutable after startup.
#[derive(Clone)]
pub struct AppState {
    pub endpoint: Arc<ServerEndpoint>,
}

impl AppState {
    pub fn new(endpoint: ServerEndpoint) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
        }
    }
}
