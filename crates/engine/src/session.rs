//! Per-connection state.
//!
//! A session is created on accept and destroyed on close. Command handling
//! happens on the connection's own task, but a few fields are observed from
//! outside it (the pub/sub drainer writes frames, the idle reaper reads the
//! last-activity instant), so the mutable pieces sit behind their own small
//! locks.

use bytes::Bytes;
use parking_lot::Mutex;
use resp::{CmdLine, RespValue};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::Notify;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub struct Session {
    id: u64,
    /// Outbound byte queue drained by the connection's writer task; `None`
    /// for fake sessions (AOF replay).
    out: Option<mpsc::UnboundedSender<Bytes>>,
    password: Mutex<String>,
    db_index: AtomicUsize,
    multi: AtomicBool,
    queue: Mutex<Vec<CmdLine>>,
    syntax_errs: Mutex<Vec<RespValue>>,
    watching: Mutex<HashMap<Bytes, u32>>,
    subscriptions: Mutex<HashSet<String>>,
    tx_id: Mutex<Option<String>>,
    last_active: Mutex<Instant>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl Session {
    pub fn new(out: mpsc::UnboundedSender<Bytes>) -> Arc<Session> {
        Arc::new(Self::build(Some(out)))
    }

    /// A session without a socket, used to replay the append-only file.
    /// Exempt from authentication.
    pub fn fake() -> Arc<Session> {
        Arc::new(Self::build(None))
    }

    fn build(out: Option<mpsc::UnboundedSender<Bytes>>) -> Session {
        Session {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            out,
            password: Mutex::new(String::new()),
            db_index: AtomicUsize::new(0),
            multi: AtomicBool::new(false),
            queue: Mutex::new(Vec::new()),
            syntax_errs: Mutex::new(Vec::new()),
            watching: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashSet::new()),
            tx_id: Mutex::new(None),
            last_active: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_fake(&self) -> bool {
        self.out.is_none()
    }

    /// Queue bytes for the connection's writer task. Returns false when the
    /// connection is gone.
    pub fn write(&self, data: Bytes) -> bool {
        match &self.out {
            Some(out) => out.send(data).is_ok(),
            None => false,
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_signal.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn closed_signal(&self) {
        self.close_signal.notified().await
    }

    pub fn password(&self) -> String {
        self.password.lock().clone()
    }

    pub fn set_password(&self, password: String) {
        *self.password.lock() = password;
    }

    pub fn db_index(&self) -> usize {
        self.db_index.load(Ordering::Relaxed)
    }

    pub fn select(&self, index: usize) {
        self.db_index.store(index, Ordering::Relaxed);
    }

    pub fn in_multi(&self) -> bool {
        self.multi.load(Ordering::SeqCst)
    }

    pub fn set_multi(&self, on: bool) {
        self.multi.store(on, Ordering::SeqCst);
        if !on {
            self.queue.lock().clear();
            self.syntax_errs.lock().clear();
        }
    }

    pub fn enqueue_cmd(&self, cmdline: CmdLine) {
        self.queue.lock().push(cmdline);
    }

    pub fn queued_cmds(&self) -> Vec<CmdLine> {
        self.queue.lock().clone()
    }

    pub fn enqueue_syntax_err(&self, err: RespValue) {
        self.syntax_errs.lock().push(err);
    }

    pub fn has_syntax_errs(&self) -> bool {
        !self.syntax_errs.lock().is_empty()
    }

    pub fn watch(&self, key: Bytes, version: u32) {
        self.watching.lock().insert(key, version);
    }

    pub fn watching(&self) -> HashMap<Bytes, u32> {
        self.watching.lock().clone()
    }

    pub fn watching_count(&self) -> usize {
        self.watching.lock().len()
    }

    pub fn cancel_watching(&self) {
        self.watching.lock().clear();
    }

    pub fn add_subscription(&self, channel: &str) {
        self.subscriptions.lock().insert(channel.to_string());
    }

    pub fn remove_subscription(&self, channel: &str) {
        self.subscriptions.lock().remove(channel);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    pub fn tx_id(&self) -> Option<String> {
        self.tx_id.lock().clone()
    }

    pub fn set_tx_id(&self, id: Option<String>) {
        *self.tx_id.lock() = id;
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_active.lock().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_queue_lifecycle() {
        let session = Session::fake();
        assert!(!session.in_multi());
        session.set_multi(true);
        session.enqueue_cmd(resp::cmdline(&["SET", "k", "v"]));
        session.enqueue_syntax_err(resp::reply::syntax());
        assert_eq!(session.queued_cmds().len(), 1);
        assert!(session.has_syntax_errs());
        // leaving multi clears both queues
        session.set_multi(false);
        assert!(session.queued_cmds().is_empty());
        assert!(!session.has_syntax_errs());
    }

    #[test]
    fn test_watch_bookkeeping() {
        let session = Session::fake();
        session.watch(Bytes::from("k"), 3);
        session.watch(Bytes::from("j"), 0);
        assert_eq!(session.watching_count(), 2);
        assert_eq!(session.watching().get(&Bytes::from("k")), Some(&3));
        session.cancel_watching();
        assert_eq!(session.watching_count(), 0);
    }

    #[test]
    fn test_subscriptions() {
        let session = Session::fake();
        session.add_subscription("news");
        session.add_subscription("news");
        session.add_subscription("sport");
        assert_eq!(session.subscription_count(), 2);
        session.remove_subscription("news");
        assert_eq!(session.subscriptions(), vec!["sport".to_string()]);
    }

    #[tokio::test]
    async fn test_write_goes_to_out_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new(tx);
        assert!(session.write(Bytes::from("+OK\r\n")));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("+OK\r\n"));
        assert!(!Session::fake().write(Bytes::from("x")));
    }
}
