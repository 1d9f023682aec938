//! Pooled access to one peer: one connection pool per database index, so a
//! connection's `SELECT` is fixed for its lifetime.

use crate::client::Client;
use crate::pool::{Factory, Pool, PoolConfig, PoolError};
use bytes::Bytes;
use resp::{reply, CmdLine, RespValue};
use tracing::warn;

const POOL_CONFIG: PoolConfig = PoolConfig {
    max_idle: 1,
    max_active: 16,
    max_retry: 1,
};

pub struct PeerGetter {
    addr: String,
    pools: Vec<Pool<Client>>,
}

impl PeerGetter {
    pub fn new(addr: &str, databases: usize, password: &str) -> PeerGetter {
        let pools = (0..databases)
            .map(|db_index| {
                let addr = addr.to_string();
                let password = password.to_string();
                let factory: Factory<Client> = Box::new(move || {
                    let addr = addr.clone();
                    let password = password.clone();
                    Box::pin(async move { build_client(&addr, &password, db_index).await })
                });
                Pool::new(factory, Box::new(|c: &Client| !c.is_closed()), POOL_CONFIG)
            })
            .collect();
        PeerGetter {
            addr: addr.to_string(),
            pools,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Run one command on the peer against the given database.
    pub async fn remote_exec(&self, db_index: usize, cmdline: &CmdLine) -> RespValue {
        let Some(pool) = self.pools.get(db_index) else {
            return reply::db_index_out_of_range();
        };
        let mut client = match pool.get().await {
            Ok(c) => c,
            Err(PoolError::MaxActive) => {
                return reply::err("ERR active connections reached max num")
            }
            Err(e) => {
                warn!(peer = %self.addr, "peer unreachable: {e}");
                return reply::err(format!("ERR remote node {} is not online", self.addr));
            }
        };
        let result = client.send(cmdline).await;
        let response = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(peer = %self.addr, "peer request failed: {e}");
                reply::err(format!("ERR remote node {} is not online", self.addr))
            }
        };
        pool.put(client).await;
        response
    }

    pub async fn close(&self) {
        for pool in &self.pools {
            pool.close().await;
        }
    }
}

async fn build_client(addr: &str, password: &str, db_index: usize) -> Result<Client, PoolError> {
    let mut client = Client::connect(addr)
        .await
        .map_err(|e| PoolError::Factory(e.to_string()))?;

    if !password.is_empty() {
        let auth = vec![Bytes::from_static(b"AUTH"), Bytes::from(password.to_string())];
        match client.send(&auth).await {
            Ok(r) if !r.is_error() => {}
            _ => {
                return Err(PoolError::Factory(
                    "cluster password is required, please set the same password on every peer"
                        .to_string(),
                ))
            }
        }
    }

    let select = vec![
        Bytes::from_static(b"SELECT"),
        Bytes::from(db_index.to_string()),
    ];
    match client.send(&select).await {
        Ok(r) if !r.is_error() => Ok(client),
        _ => Err(PoolError::Factory(format!("select {db_index} on {addr} failed"))),
    }
}
