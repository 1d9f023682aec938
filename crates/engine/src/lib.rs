//! Storage engine: logical databases, command dispatch, transactions,
//! append-only persistence and pub/sub.
//!
//! One [`db::Db`] is a single logical database (data + TTL + versions +
//! stripe locks). The multi-database server sitting above implements
//! [`DbEngine`] so the AOF persister can replay and iterate without caring
//! which concrete server drives it.

pub mod aof;
pub mod commands;
pub mod config;
pub mod db;
pub mod entity;
pub mod publish;
pub mod registry;
pub mod session;
mod ttl;
mod tx;

use async_trait::async_trait;
use bytes::Bytes;
use resp::{CmdLine, RespValue};
use session::Session;
use std::sync::Arc;
use std::time::SystemTime;

pub use entity::DataEntity;

/// The surface the AOF persister needs from the server above it: replay a
/// command line against some session, iterate a database, and know how many
/// databases exist.
#[async_trait]
pub trait DbEngine: Send + Sync {
    async fn exec(&self, session: &Arc<Session>, cmdline: &CmdLine) -> RespValue;

    fn for_each(
        &self,
        db_index: usize,
        f: &mut dyn FnMut(&Bytes, &DataEntity, Option<SystemTime>) -> bool,
    );

    fn databases(&self) -> usize;
}
