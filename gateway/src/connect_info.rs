// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Peer certificate extraction at connection time.

use std::any::Any;

use actix_tls::accept::rustls_0_23::TlsStream;
use actix_web::{dev::Extensions, rt::net::TcpStream};

use relaybackend::tls::{peer_identity, PeerIdentity};

/// The verified peer certificate identity for this connection.
#[derive(Debug, Clone)]
pub struct TlsPeer(pub PeerIdentity);

/// `on_connect` hook storing the peer's CN and fingerprint. The TLS
/// verifier has already validated the chain against the broker CA and the
/// CRL; what is left for the handlers is mapping the CN to a client record.
pub fn extract_peer_identity(connection: &dyn Any, ext: &mut Extensions) {
    let Some(tls_stream) = connection.downcast_ref::<TlsStream<TcpStream>>() else {
        return;
    };
    let (_, session) = tls_stream.get_ref();
    let Some(leaf) = session.peer_certificates().and_then(|certs| certs.first()) else {
        return;
    };
    match peer_identity(leaf) {
        Ok(identity) => {
            ext.insert(TlsPeer(identity));
        }
        Err(error) => {
            tracing::warn!(%error, "failed to parse verified peer certificate");
        }
    }
}
