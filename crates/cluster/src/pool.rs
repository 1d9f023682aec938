//! Generic async connection pool with a bounded active count.
//!
//! Dead idle connections (per the liveness check) are dropped on `get`;
//! dropping a connection is its finalizer.

use std::future::Future;
use std::pin::Pin;
use tokio::sync::Mutex;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type Factory<T> = Box<dyn Fn() -> BoxFuture<Result<T, PoolError>> + Send + Sync>;
pub type CheckAlive<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool closed")]
    Closed,
    #[error("active connections reached max num")]
    MaxActive,
    #[error("{0}")]
    Factory(String),
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_idle: usize,
    pub max_active: usize,
    pub max_retry: usize,
}

struct State<T> {
    idles: Vec<T>,
    active: usize,
    closed: bool,
}

pub struct Pool<T> {
    config: PoolConfig,
    factory: Factory<T>,
    check_alive: CheckAlive<T>,
    state: Mutex<State<T>>,
}

impl<T: Send> Pool<T> {
    pub fn new(factory: Factory<T>, check_alive: CheckAlive<T>, config: PoolConfig) -> Pool<T> {
        Pool {
            config,
            factory,
            check_alive,
            state: Mutex::new(State {
                idles: Vec::with_capacity(config.max_idle),
                active: 0,
                closed: false,
            }),
        }
    }

    /// Take an idle live connection, or build one. Fails once the active
    /// count reaches `max_active`.
    pub async fn get(&self) -> Result<T, PoolError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(PoolError::Closed);
        }

        while let Some(item) = state.idles.pop() {
            if (self.check_alive)(&item) {
                state.active += 1;
                return Ok(item);
            }
        }

        if state.active >= self.config.max_active {
            return Err(PoolError::MaxActive);
        }

        let mut last_err = PoolError::Factory("factory never ran".to_string());
        for _ in 0..self.config.max_retry.max(1) {
            match (self.factory)().await {
                Ok(item) => {
                    state.active += 1;
                    return Ok(item);
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Return a connection; kept idle while there is room and it is still
    /// alive, dropped otherwise.
    pub async fn put(&self, item: T) {
        let mut state = self.state.lock().await;
        state.active = state.active.saturating_sub(1);
        if state.closed || !(self.check_alive)(&item) {
            return;
        }
        if state.idles.len() < self.config.max_idle {
            state.idles.push(item);
        }
    }

    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.idles.clear();
    }
}
