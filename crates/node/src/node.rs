//! The multi-database server: owns the database set, the AOF persister, the
//! pub/sub registry and (in cluster mode) the cluster router. `handle` is
//! the single dispatch point for every parsed command line.

use async_trait::async_trait;
use bytes::Bytes;
use cluster::Cluster;
use engine::aof::{FsyncPolicy, Persister, TmpEngineMaker};
use engine::config::ServerConfig;
use engine::db::{Db, WHEEL_INTERVAL, WHEEL_SLOTS};
use engine::publish::Publish;
use engine::session::Session;
use engine::{DataEntity, DbEngine};
use parking_lot::RwLock;
use resp::{reply, CmdLine, RespValue};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use storage::TimeWheel;
use tracing::{debug, error, info};

pub struct Node {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) dbs: Vec<Arc<Db>>,
    pub(crate) persister: RwLock<Option<Arc<Persister>>>,
    /// File size recorded when auto-rewrite last fired; the trigger
    /// compares growth against it.
    aof_base_size: AtomicU64,
    pub(crate) publish: Publish,
    pub(crate) cluster: Option<Arc<Cluster>>,
    wheel: TimeWheel,
    closed: AtomicBool,
}

impl Node {
    pub async fn new(config: ServerConfig) -> anyhow::Result<Arc<Node>> {
        config.validate()?;
        let config = Arc::new(config);
        let wheel = TimeWheel::start(WHEEL_INTERVAL, WHEEL_SLOTS);

        let dbs: Vec<Arc<Db>> = (0..config.databases)
            .map(|i| Db::new(i, wheel.clone(), config.open_atomic_tx))
            .collect();

        let cluster_router = if config.is_cluster() {
            info!(self_addr = %config.self_addr, peers = ?config.peers, "cluster mode");
            Some(Arc::new(Cluster::new(&config, wheel.clone())))
        } else {
            None
        };

        let node = Arc::new(Node {
            config: config.clone(),
            dbs,
            persister: RwLock::new(None),
            aof_base_size: AtomicU64::new(0),
            publish: Publish::new(),
            cluster: cluster_router,
            wheel,
            closed: AtomicBool::new(false),
        });

        if config.append_only {
            let policy = FsyncPolicy::from_config(config.aof_fsync)?;
            let base = std::fs::metadata(&config.aof_filename)
                .map(|m| m.len())
                .unwrap_or(0);
            node.aof_base_size.store(base, Ordering::SeqCst);

            let databases = config.databases;
            let tmp_maker: TmpEngineMaker = Box::new(move || Node::new_auxiliary(databases));
            let persister = Persister::new(
                node.clone() as Arc<dyn DbEngine>,
                &config.aof_filename,
                true,
                policy,
                tmp_maker,
            )
            .await?;
            for db in &node.dbs {
                db.bind_aof(persister.clone());
            }
            *node.persister.write() = Some(persister);

            if config.auto_aof_rewrite {
                tokio::spawn(auto_rewrite_loop(node.clone()));
            }
        }

        Ok(node)
    }

    /// A bare engine used as the AOF rewrite replay target: small databases,
    /// no persistence, no cluster.
    fn new_auxiliary(databases: usize) -> Arc<dyn DbEngine> {
        let wheel = TimeWheel::start(WHEEL_INTERVAL, 16);
        Arc::new(Node {
            config: Arc::new(ServerConfig {
                databases,
                ..ServerConfig::default()
            }),
            dbs: (0..databases).map(|i| Db::new_basic(i, wheel.clone())).collect(),
            persister: RwLock::new(None),
            aof_base_size: AtomicU64::new(0),
            publish: Publish::new(),
            cluster: None,
            wheel,
            closed: AtomicBool::new(false),
        })
    }

    pub fn publish(&self) -> &Publish {
        &self.publish
    }

    pub(crate) fn db_for(&self, session: &Session) -> Result<&Arc<Db>, RespValue> {
        self.dbs
            .get(session.db_index())
            .ok_or_else(reply::db_index_out_of_range)
    }

    /// Dispatch one command line for a session. `None` means no immediate
    /// reply (subscribe/unsubscribe confirmations arrive via the channel
    /// registry).
    pub async fn handle(&self, session: &Arc<Session>, cmdline: &CmdLine) -> Option<RespValue> {
        let Some(first) = cmdline.first() else {
            return Some(reply::err("ERR empty command"));
        };
        let name = String::from_utf8_lossy(first).to_ascii_lowercase();

        if name == "ping" {
            debug!(session = session.id(), "heartbeat");
            return Some(reply::pong());
        }

        // replay sessions are exempt from authentication
        if !session.is_fake() {
            if name == "auth" {
                return Some(self.auth(session, &cmdline[1..]));
            }
            if !self.is_authenticated(session) {
                return Some(reply::noauth());
            }
        }

        match &self.cluster {
            None => self.handle_standalone(session, &name, cmdline).await,
            Some(cluster_router) => {
                let cluster_router = cluster_router.clone();
                self.handle_cluster(&cluster_router, session, &name, cmdline).await
            }
        }
    }

    async fn handle_standalone(
        &self,
        session: &Arc<Session>,
        name: &str,
        cmdline: &CmdLine,
    ) -> Option<RespValue> {
        let args = &cmdline[1..];
        match name {
            "select" => Some(self.select(session, args)),
            "bgrewriteaof" => Some(self.bgrewriteaof()),
            "rewriteaof" => Some(self.rewriteaof().await),
            "multi" => Some(self.start_multi(session, args)),
            "exec" => Some(self.exec_multi_standalone(session, args).await),
            "discard" => Some(self.discard_multi(session, args)),
            "watch" => Some(self.watch_standalone(session, args)),
            "unwatch" => Some(self.unwatch(session, args)),
            "subscribe" => self.subscribe(session, args),
            "unsubscribe" => self.unsubscribe(session, args),
            "publish" => Some(self.publish_local(args).await),
            "pubsub" => Some(self.pubsub_local(args)),
            _ => match self.db_for(session) {
                Ok(db) => Some(db.exec(session, cmdline).await),
                Err(e) => Some(e),
            },
        }
    }

    async fn handle_cluster(
        &self,
        cluster_router: &Arc<Cluster>,
        session: &Arc<Session>,
        name: &str,
        cmdline: &CmdLine,
    ) -> Option<RespValue> {
        let args = &cmdline[1..];
        match name {
            "select" => Some(self.select(session, args)),
            "bgrewriteaof" => Some(self.bgrewriteaof()),
            "rewriteaof" => Some(self.rewriteaof().await),
            "multi" => Some(cluster_router.start_multi(session)),
            "exec" => Some(cluster_router.exec_multi(session).await),
            "discard" => Some(cluster_router.discard_multi(session)),
            "watch" => match self.db_for(session) {
                Ok(db) => Some(cluster_router.watch(session, db, args).await),
                Err(e) => Some(e),
            },
            "unwatch" => Some(cluster_router.unwatch(session)),
            "subscribe" => self.subscribe(session, args),
            "unsubscribe" => self.unsubscribe(session, args),
            "publish" => Some(self.publish_cluster(cluster_router, args).await),
            "pubsub" => Some(self.pubsub_cluster(cluster_router, args).await),
            // peer-internal verbs
            "try" => match self.db_for(session) {
                Ok(db) => Some(cluster_router.try_cmd(db, args).await),
                Err(e) => Some(e),
            },
            "commit" => Some(cluster_router.commit_cmd(args).await),
            "cancel" => Some(cluster_router.cancel_cmd(args).await),
            "end" => Some(cluster_router.end_cmd(args).await),
            "singlepublish" => Some(self.publish_local(args).await),
            "singlepubsub" => Some(self.pubsub_local(args)),
            _ => match self.db_for(session) {
                Ok(db) => Some(cluster_router.exec(session, db, cmdline).await),
                Err(e) => Some(e),
            },
        }
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let persister = self.persister.read().clone();
        if let Some(persister) = persister {
            persister.close().await;
        }
        if let Some(cluster_router) = &self.cluster {
            cluster_router.close().await;
        }
        self.publish.close();
        self.wheel.stop();
        info!("node closed");
    }
}

#[async_trait]
impl DbEngine for Node {
    async fn exec(&self, session: &Arc<Session>, cmdline: &CmdLine) -> RespValue {
        self.handle(session, cmdline)
            .await
            .unwrap_or_else(reply::ok)
    }

    fn for_each(
        &self,
        db_index: usize,
        f: &mut dyn FnMut(&Bytes, &DataEntity, Option<SystemTime>) -> bool,
    ) {
        if let Some(db) = self.dbs.get(db_index) {
            db.for_each(|key, entity, expiration| f(key, entity, expiration));
        }
    }

    fn databases(&self) -> usize {
        self.dbs.len()
    }
}

/// Every 10 s: rewrite when the file grew past the configured percentage of
/// the last recorded size and exceeds the minimum size. The baseline is the
/// size measured just before the rewrite, so a shrink during rewrite still
/// counts against the old figure.
async fn auto_rewrite_loop(node: Arc<Node>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if node.closed.load(Ordering::SeqCst) {
            return;
        }
        let persister = node.persister.read().clone();
        let Some(persister) = persister else { return };
        if persister.is_rewriting() {
            continue;
        }

        let size = std::fs::metadata(&node.config.aof_filename)
            .map(|m| m.len())
            .unwrap_or(0);
        let base = node.aof_base_size.load(Ordering::SeqCst);
        let threshold = base.saturating_mul(node.config.auto_aof_rewrite_percentage) / 100;
        let min_size = node.config.auto_aof_rewrite_min_size * 1024 * 1024;
        if size > threshold && size > min_size {
            info!(size, base, "auto aof rewrite triggered");
            if let Err(e) = persister.rewrite().await {
                error!("auto aof rewrite failed: {e}");
            }
            node.aof_base_size.store(size, Ordering::SeqCst);
        }
    }
}
