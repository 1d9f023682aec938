//! Data-command executors, grouped by value type.
//!
//! Each module registers its commands into the process-wide table. Shared
//! here: the key-extractor conventions and argument parsing helpers.

pub mod hashes;
pub mod keys;
pub mod lists;
pub mod sets;
pub mod strings;
pub mod zsets;

use bytes::Bytes;
use resp::{reply, RespValue};

/* ---- key extractors ---- */

pub(crate) fn write_first_key(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (vec![args[0].clone()], Vec::new())
}

pub(crate) fn read_first_key(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), vec![args[0].clone()])
}

pub(crate) fn read_all_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), args.to_vec())
}

/// MSET-style alternating key value pairs: the keys are the even positions.
pub(crate) fn write_alternate_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (args.iter().step_by(2).cloned().collect(), Vec::new())
}

/// Set-algebra commands read every argument.
pub(crate) fn set_calculate_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), args.to_vec())
}

/// `*STORE` variants: destination written, sources read.
pub(crate) fn set_calculate_store_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (vec![args[0].clone()], args[1..].to_vec())
}

pub(crate) fn no_keys(_args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), Vec::new())
}

/* ---- argument parsing ---- */

pub(crate) fn parse_i64(raw: &[u8]) -> Result<i64, RespValue> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(reply::not_integer)
}

pub(crate) fn parse_f64(raw: &[u8]) -> Result<f64, RespValue> {
    let value = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(reply::not_float)?;
    if value.is_nan() {
        return Err(reply::not_float());
    }
    Ok(value)
}

/// Normalize a possibly-negative index against `len`; `None` when out of
/// range.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    if index < 0 || index >= len {
        None
    } else {
        Some(index as usize)
    }
}

/// Normalize an inclusive `[start, stop]` pair the way range commands do:
/// negatives count from the tail, bounds clamp, inverted ranges are empty.
pub(crate) fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let ilen = len as i64;
    let mut start = if start < 0 { ilen + start } else { start };
    let mut stop = if stop < 0 { ilen + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= ilen {
        stop = ilen - 1;
    }
    if start > stop || start >= ilen || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}
