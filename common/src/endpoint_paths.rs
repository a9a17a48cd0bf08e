// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Route constants shared by the servers and the API client.

/// Gateway submission endpoint.
pub const ENDPOINT_SUBMIT: &str = "/api/v1/messages";

/// Internal registry endpoints, reachable over mTLS only.
pub const ENDPOINT_INTERNAL_REGISTER: &str = "/internal/messages/register";
pub const ENDPOINT_INTERNAL_DELIVER: &str = "/internal/messages/deliver";
pub const ENDPOINT_INTERNAL_STATUS: &str = "/internal/messages/{message_id}/status";

/// Portal endpoints.
pub const ENDPOINT_PORTAL_LOGIN: &str = "/portal/auth/login";
pub const ENDPOINT_PORTAL_REFRESH: &str = "/portal/auth/refresh";
pub const ENDPOINT_PORTAL_FORGOT_PASSWORD: &str = "/portal/auth/forgot-password";
pub const ENDPOINT_PORTAL_RESET_PASSWORD: &str = "/portal/auth/reset-password";
pub const ENDPOINT_PORTAL_MESSAGES: &str = "/portal/messages";
pub const ENDPOINT_PORTAL_PROFILE: &str = "/portal/profile";

/// Admin endpoints.
pub const ENDPOINT_ADMIN_USERS: &str = "/admin/users";
pub const ENDPOINT_ADMIN_USER_ROLE: &str = "/admin/users/{user_id}/role";
pub const ENDPOINT_ADMIN_USER_STATUS: &str = "/admin/users/{user_id}/status";
pub const ENDPOINT_ADMIN_USER_PASSWORD: &str = "/admin/users/{user_id}/password";
pub const ENDPOINT_ADMIN_CLIENTS: &str = "/admin/clients";
pub const ENDPOINT_ADMIN_CLIENT_REVOKE: &str = "/admin/clients/{client_id}/revoke";
pub const ENDPOINT_ADMIN_CLIENTS_EXPIRING: &str = "/admin/clients/expiring";
pub const ENDPOINT_ADMIN_STATS: &str = "/admin/stats";
pub const ENDPOINT_ADMIN_MESSAGE_BODY: &str = "/admin/messages/{message_id}/body";
pub const ENDPOINT_ADMIN_RETENTION: &str = "/admin/retention/cleanup";

/// Operational endpoints present on every service.
pub const ENDPOINT_HEALTH: &str = "/health";
pub const ENDPOINT_METRICS: &str = "/metrics";
