//! Online log compaction.
//!
//! Three phases around the shared pause mutex:
//!
//! 1. *Start*: pause the writer, fsync, snapshot the file size and current
//!    database, create the temp file, resume.
//! 2. *Do*: without the pause mutex: load the log prefix (up to the
//!    snapshot size) into an auxiliary engine, then write one synthesized
//!    command per live key into the temp file, database by database. Live
//!    traffic keeps appending to the original file past the snapshot offset.
//! 3. *Finish*: pause again, align the temp file to the snapshot database,
//!    copy the tail written during phase 2, rename over the original,
//!    reopen, re-`SELECT` so file and persister agree, resume.

use super::{load_file, select_cmdline, AofError, Persister};
use resp::{encode_to_vec, RespValue};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::Ordering;
use tempfile::NamedTempFile;
use tracing::{error, info};

struct RewriteCtx {
    tmp: NamedTempFile,
    file_size: u64,
    db_index: usize,
}

impl Persister {
    pub fn is_rewriting(&self) -> bool {
        self.rewriting.load(Ordering::SeqCst)
    }

    /// Run one rewrite; a second caller while one is in flight returns
    /// immediately.
    pub async fn rewrite(&self) -> Result<(), AofError> {
        if self.rewriting.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _gate = self.rewrite_gate.lock().await;
        info!("aof rewrite started");

        let result = self.rewrite_phases().await;
        self.rewriting.store(false, Ordering::SeqCst);
        match &result {
            Ok(()) => info!("aof rewrite finished"),
            Err(e) => error!("aof rewrite failed: {e}"),
        }
        result
    }

    async fn rewrite_phases(&self) -> Result<(), AofError> {
        let ctx = self.start_rewrite().await?;
        let ctx = self.do_rewrite(ctx).await?;
        self.finish_rewrite(ctx).await
    }

    async fn start_rewrite(&self) -> Result<RewriteCtx, AofError> {
        let state = self.state.lock().await;
        state.file.sync_data()?;

        let file_size = std::fs::metadata(&self.filename)?.len();
        let dir = Path::new(&self.filename)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new().suffix(".aof").tempfile_in(dir)?;

        Ok(RewriteCtx {
            tmp,
            file_size,
            db_index: state.current_db,
        })
    }

    async fn do_rewrite(&self, mut ctx: RewriteCtx) -> Result<RewriteCtx, AofError> {
        let aux = (self.tmp_engine_maker)();
        load_file(&aux, &self.filename, ctx.file_size).await;

        for db_index in 0..aux.databases() {
            let select = encode_to_vec(&RespValue::from_command(select_cmdline(db_index)));
            ctx.tmp.as_file_mut().write_all(&select)?;

            let mut io_err: Option<std::io::Error> = None;
            aux.for_each(db_index, &mut |key, entity, expiration| {
                let frames = super::entry_frames(key, entity, expiration);
                if let Err(e) = ctx.tmp.as_file_mut().write_all(&frames) {
                    io_err = Some(e);
                    return false;
                }
                true
            });
            if let Some(e) = io_err {
                return Err(e.into());
            }
        }
        Ok(ctx)
    }

    async fn finish_rewrite(&self, mut ctx: RewriteCtx) -> Result<(), AofError> {
        let mut state = self.state.lock().await;

        // align the temp file to the database the snapshot left off in, then
        // carry over everything written while phase 2 ran
        let select = encode_to_vec(&RespValue::from_command(select_cmdline(ctx.db_index)));
        ctx.tmp.as_file_mut().write_all(&select)?;

        let mut src = std::fs::File::open(&self.filename)?;
        src.seek(SeekFrom::Start(ctx.file_size))?;
        std::io::copy(&mut src, ctx.tmp.as_file_mut())?;
        ctx.tmp.as_file_mut().sync_data()?;

        ctx.tmp
            .persist(&self.filename)
            .map_err(|e| AofError::Io(e.error))?;

        let file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.filename)?;
        state.file = file;

        // one more SELECT so the on-disk tail matches current_db
        let select = encode_to_vec(&RespValue::from_command(select_cmdline(ctx.db_index)));
        state.file.write_all(&select)?;
        state.current_db = ctx.db_index;
        Ok(())
    }
}
