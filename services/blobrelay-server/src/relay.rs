//! TURN relay startup and credential bridge.
//!
//! The relay protocol itself is the `turn` crate's business; this module
//! only supplies the long-term-credential lookup over the account table and
//! wires the listener up at process start. A bind failure here aborts
//! startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::UdpSocket;
use tracing::info;
use turn::auth::{generate_auth_key, AuthHandler};
use turn::relay::relay_static::RelayAddressGeneratorStatic;
use turn::server::config::{ConnConfig, ServerConfig};
use turn::server::Server;
use webrtc_util::vnet::net::Net;

use blobrelay_core::{AccountTable, TurnConfig};

/// Read-only authentication callback over the shared account table.
pub struct CredentialBridge {
    accounts: Arc<AccountTable>,
    realm: String,
}

impl CredentialBridge {
    pub fn new(accounts: Arc<AccountTable>, realm: String) -> Self {
        Self { accounts, realm }
    }
}

impl AuthHandler for CredentialBridge {
    fn auth_handle(
        &self,
        username: &str,
        _realm: &str,
        src_addr: SocketAddr,
    ) -> Result<Vec<u8>, turn::Error> {
        match self.accounts.lookup(username) {
            Some(secret) => Ok(generate_auth_key(username, &self.realm, secret)),
            None => Err(turn::Error::Other(format!(
                "unknown TURN user {username} from {src_addr}"
            ))),
        }
    }
}

/// Bind the UDP listener and start the relay.
pub async fn start(config: &TurnConfig, accounts: Arc<AccountTable>) -> anyhow::Result<Server> {
    let conn = UdpSocket::bind(&config.listen_address)
        .await
        .with_context(|| format!("failed to bind TURN listener on {}", config.listen_address))?;

    let public_address: std::net::IpAddr = config
        .public_address
        .parse()
        .with_context(|| format!("invalid turn.public_address {}", config.public_address))?;

    let server = Server::new(ServerConfig {
        conn_configs: vec![ConnConfig {
            conn: Arc::new(conn),
            relay_addr_generator: Box::new(RelayAddressGeneratorStatic {
                relay_address: public_address,
                address: "0.0.0.0".to_owned(),
                net: Arc::new(Net::new(None)),
            }),
        }],
        realm: config.realm.clone(),
        auth_handler: Arc::new(CredentialBridge::new(accounts, config.realm.clone())),
        channel_bind_timeout: Duration::from_secs(0),
        alloc_close_notify: None,
    })
    .await
    .context("failed to start TURN relay")?;

    info!(
        "TURN relay listening on {} (realm {})",
        config.listen_address, config.realm
    );
    Ok(server)
}
