// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Backend services of the relay broker: crypto engine, identity store,
//! message registry, durable work queue, rate limiter and portal token
//! handling. The gateway, registry server and worker binaries compose these
//! into processes; nothing in here owns global state.

pub mod auth;
pub mod crypto;
pub mod errors;
pub mod identity;
pub mod infra_service;
pub mod queue;
pub mod rate_limiter;
pub mod registry;
pub mod settings;
pub mod telemetry;
pub mod tls;
