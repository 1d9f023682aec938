//! Append-only persistence.
//!
//! Every durable write is re-serialized as a RESP array and appended to the
//! log; `SELECT` frames partition the stream into per-database segments.
//! Ingress is a bounded channel drained by one writer task, except under the
//! `Always` policy where the caller writes (and fsyncs) inline. Loading
//! replays the file through the engine against a fake session with the
//! channel detached, so replay never re-captures itself.

mod rewrite;

use crate::entity;
use crate::session::Session;
use crate::DbEngine;
use bytes::Bytes;
use resp::{encode_to_vec, RespError, RespValue};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info, warn};

const AOF_QUEUE_SIZE: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// fsync after every frame; writes happen inline on the caller.
    Always,
    /// a background ticker fsyncs once per second.
    EverySec,
    /// leave flushing to the operating system.
    No,
}

impl FsyncPolicy {
    pub fn from_config(value: u8) -> Result<FsyncPolicy, AofError> {
        match value {
            0 => Ok(FsyncPolicy::Always),
            1 => Ok(FsyncPolicy::EverySec),
            2 => Ok(FsyncPolicy::No),
            other => Err(AofError::InvalidPolicy(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AofError {
    #[error("aof io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid aof_fsync {0} (0 = always, 1 = every sec, 2 = no)")]
    InvalidPolicy(u8),
}

struct Payload {
    db_index: usize,
    cmdline: resp::CmdLine,
}

enum WriterMsg {
    Cmd(Payload),
    Shutdown,
}

/// File handle plus the database the last appended frame belongs to. The
/// mutex doubles as the pause gate shared with the rewrite phases.
struct AofState {
    file: File,
    current_db: usize,
}

/// Builds the auxiliary engine a rewrite loads the log prefix into.
pub type TmpEngineMaker = Box<dyn Fn() -> Arc<dyn DbEngine> + Send + Sync>;

pub struct Persister {
    engine: Arc<dyn DbEngine>,
    tmp_engine_maker: TmpEngineMaker,
    filename: String,
    policy: FsyncPolicy,
    state: Mutex<AofState>,
    queue: mpsc::Sender<WriterMsg>,
    accepting: AtomicBool,
    closed: AtomicBool,
    rewriting: AtomicBool,
    /// Held for the duration of a rewrite; `close` takes it to wait out an
    /// in-flight rewrite.
    rewrite_gate: Mutex<()>,
    writer_done: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Persister {
    /// Open (and optionally load) the log, then start the writer task and
    /// the fsync ticker the policy asks for.
    pub async fn new(
        engine: Arc<dyn DbEngine>,
        filename: &str,
        load: bool,
        policy: FsyncPolicy,
        tmp_engine_maker: TmpEngineMaker,
    ) -> Result<Arc<Persister>, AofError> {
        let mut current_db = 0;
        if load {
            current_db = load_file(&engine, filename, 0).await;
        }

        let file = OpenOptions::new().append(true).create(true).open(filename)?;
        let (queue, rx) = mpsc::channel(AOF_QUEUE_SIZE);
        let (done_tx, done_rx) = oneshot::channel();

        let persister = Arc::new(Persister {
            engine,
            tmp_engine_maker,
            filename: filename.to_string(),
            policy,
            state: Mutex::new(AofState { file, current_db }),
            queue,
            accepting: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            rewriting: AtomicBool::new(false),
            rewrite_gate: Mutex::new(()),
            writer_done: Mutex::new(Some(done_rx)),
        });

        tokio::spawn(writer_loop(persister.clone(), rx, done_tx));
        if policy == FsyncPolicy::EverySec {
            tokio::spawn(fsync_ticker(persister.clone()));
        }
        Ok(persister)
    }

    pub fn engine(&self) -> &Arc<dyn DbEngine> {
        &self.engine
    }

    /// Capture one durable write. Inline under `Always`, queued otherwise.
    pub async fn save(&self, db_index: usize, cmdline: resp::CmdLine) {
        if !self.accepting.load(Ordering::SeqCst) {
            return;
        }
        let payload = Payload { db_index, cmdline };
        match self.policy {
            FsyncPolicy::Always => self.write_frame(&payload).await,
            _ => {
                let _ = self.queue.send(WriterMsg::Cmd(payload)).await;
            }
        }
    }

    async fn write_frame(&self, payload: &Payload) {
        let mut state = self.state.lock().await;
        self.write_frame_locked(&mut state, payload);
    }

    fn write_frame_locked(&self, state: &mut AofState, payload: &Payload) {
        if payload.db_index != state.current_db {
            let select = select_cmdline(payload.db_index);
            if let Err(e) = state.file.write_all(&encode_to_vec(&RespValue::from_command(select))) {
                warn!("aof select write failed: {e}");
                return;
            }
            state.current_db = payload.db_index;
        }

        let frame = encode_to_vec(&RespValue::from_command(payload.cmdline.clone()));
        if let Err(e) = state.file.write_all(&frame) {
            warn!("aof write failed: {e}");
        }
        if self.policy == FsyncPolicy::Always {
            if let Err(e) = state.file.sync_data() {
                warn!("aof fsync failed: {e}");
            }
        }
    }

    /// Wait for any in-flight rewrite, drain the queue, fsync and stop.
    pub async fn close(&self) {
        let _gate = self.rewrite_gate.lock().await;
        self.accepting.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.queue.send(WriterMsg::Shutdown).await;
        if let Some(done) = self.writer_done.lock().await.take() {
            let _ = done.await;
        }
        let state = self.state.lock().await;
        if let Err(e) = state.file.sync_data() {
            warn!("aof final fsync failed: {e}");
        }
        info!("aof persister closed");
    }
}

async fn writer_loop(
    persister: Arc<Persister>,
    mut rx: mpsc::Receiver<WriterMsg>,
    done: oneshot::Sender<()>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            WriterMsg::Cmd(payload) => persister.write_frame(&payload).await,
            WriterMsg::Shutdown => break,
        }
    }
    let _ = done.send(());
}

async fn fsync_ticker(persister: Arc<Persister>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if persister.closed.load(Ordering::SeqCst) {
            return;
        }
        let state = persister.state.lock().await;
        if let Err(e) = state.file.sync_data() {
            error!("aof fsync failed: {e}");
        }
    }
}

pub(crate) fn select_cmdline(db_index: usize) -> resp::CmdLine {
    vec![
        Bytes::from_static(b"SELECT"),
        Bytes::from(db_index.to_string()),
    ]
}

/// Replay up to `max_bytes` of the log (0 = all) through `engine` and return
/// the last `SELECT`ed database index.
pub async fn load_file(engine: &Arc<dyn DbEngine>, filename: &str, max_bytes: u64) -> usize {
    let file = match File::open(filename) {
        Ok(f) => f,
        Err(_) => return 0, // nothing persisted yet
    };
    let mut parser = resp::limited_parser(file, max_bytes);
    let fake = Session::fake();
    let mut current_db = 0;

    loop {
        match parser.parse() {
            Ok(frame) => {
                let Some(cmdline) = frame.to_command() else {
                    error!("aof frame is not a command, skipping");
                    continue;
                };
                let result = engine.exec(&fake, &cmdline).await;
                if result.is_error() {
                    error!(
                        "aof replay error for '{}'",
                        String::from_utf8_lossy(&cmdline[0])
                    );
                }
                if cmdline[0].eq_ignore_ascii_case(b"select") && cmdline.len() == 2 {
                    if let Ok(index) = String::from_utf8_lossy(&cmdline[1]).parse::<usize>() {
                        current_db = index;
                    }
                }
            }
            Err(RespError::UnexpectedEof) => break,
            Err(e) => {
                error!("aof parse error: {e}");
                break;
            }
        }
    }
    current_db
}

/// Serialize one live entry (plus its TTL) as write-command frames.
pub(crate) fn entry_frames(
    key: &Bytes,
    entity: &crate::DataEntity,
    expiration: Option<std::time::SystemTime>,
) -> Vec<u8> {
    let mut out = Vec::new();
    let cmd = entity::entity_to_cmdline(key, entity);
    // an empty container serializes to a bare verb; nothing to rebuild
    if cmd.len() >= 3 {
        out.extend_from_slice(&encode_to_vec(&RespValue::from_command(cmd)));
        if let Some(at) = expiration {
            let expire = entity::expire_to_cmdline(key, at);
            out.extend_from_slice(&encode_to_vec(&RespValue::from_command(expire)));
        }
    }
    out
}
