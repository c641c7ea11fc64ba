//! The server: one [`Account`] per configured account, a [`TcpListener`]
//! accept loop that frames requests through [`protocol`] and dispatches
//! them via [`handler`], and a `ctrl_c`-triggered graceful shutdown —
//! mirrored on `s5_node::run_node`'s "build everything, go online, wait
//! for ctrl_c, shut down" shape, generalized from one iroh endpoint to one
//! listener per configured account set.

pub mod account;
pub mod config;
pub mod handler;
pub mod protocol;
pub mod provider;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use account::Account;
use config::ServerConfig;
use protocol::{read_frame, write_frame, Request, Response};

pub struct CofferServer {
    config: ServerConfig,
    accounts: HashMap<u64, Arc<Account>>,
}

impl CofferServer {
    /// Opens every configured account (each gets its own record store,
    /// crypto context, and housekeeping task) without binding a socket yet.
    pub fn open(config: ServerConfig) -> anyhow::Result<Self> {
        let mut accounts = HashMap::new();
        for (name, account_config) in &config.accounts {
            let account_id: u64 = name
                .parse()
                .with_context(|| format!("account key {name:?} is not a valid account id"))?;
            let mut account = Account::open(&config, account_id, account_config)
                .with_context(|| format!("opening account {name:?}"))?;
            account.spawn_housekeeping(&config);
            accounts.insert(account_id, Arc::new(account));
        }
        Ok(Self { config, accounts })
    }

    /// Binds the listener and serves connections until ctrl_c.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("binding {}", self.config.listen_addr))?;
        info!(addr = %self.config.listen_addr, accounts = self.accounts.len(), "coffer_server online");

        let accounts = Arc::new(self.accounts);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let accounts = accounts.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve_connection(stream, accounts).await {
                            warn!(%peer, error = %err, "connection ended with error");
                        }
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Every request on the wire naming its account explicitly is out of scope
/// here, since the auth handshake itself isn't — for now a connection is
/// pinned to the first (and, in the common single-account deployment,
/// only) configured account. Multi-account routing over one socket is
/// future work once the handshake carries an account id.
async fn serve_connection(mut stream: TcpStream, accounts: Arc<HashMap<u64, Arc<Account>>>) -> anyhow::Result<()> {
    let account = accounts
        .values()
        .next()
        .cloned()
        .context("no accounts configured")?;
    loop {
        let request: Request = match read_frame(&mut stream).await {
            Ok(request) => request,
            Err(_) => return Ok(()),
        };
        let response = match handler::handle_request(&account, request).await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "request failed");
                Response::from_result(Err(err))
            }
        };
        write_frame(&mut stream, &response).await?;
    }
}
