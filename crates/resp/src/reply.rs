//! Canonical reply constructors.
//!
//! Every client-visible reply the server produces goes through one of these,
//! so the exact error wording lives in a single place.

use crate::RespValue;
use bytes::Bytes;

pub fn ok() -> RespValue {
    RespValue::SimpleString(Bytes::from_static(b"OK"))
}

pub fn pong() -> RespValue {
    RespValue::SimpleString(Bytes::from_static(b"PONG"))
}

pub fn queued() -> RespValue {
    RespValue::SimpleString(Bytes::from_static(b"QUEUED"))
}

pub fn status(msg: impl Into<String>) -> RespValue {
    RespValue::SimpleString(Bytes::from(msg.into()))
}

pub fn err(msg: impl Into<String>) -> RespValue {
    RespValue::Error(Bytes::from(msg.into()))
}

pub fn integer(n: i64) -> RespValue {
    RespValue::Integer(n)
}

pub fn bulk(data: impl Into<Bytes>) -> RespValue {
    RespValue::BulkString(Some(data.into()))
}

pub fn null_bulk() -> RespValue {
    RespValue::BulkString(None)
}

/// Multi-bulk reply whose elements are all bulk strings.
pub fn multi_bulk(items: Vec<Bytes>) -> RespValue {
    RespValue::Array(items.into_iter().map(|b| RespValue::BulkString(Some(b))).collect())
}

pub fn empty_multi_bulk() -> RespValue {
    RespValue::Array(Vec::new())
}

pub fn unknown_command(name: &str) -> RespValue {
    err(format!("ERR unknown command '{name}'"))
}

pub fn arg_num(name: &str) -> RespValue {
    err(format!("ERR wrong number of arguments for '{name}' command"))
}

pub fn wrong_type() -> RespValue {
    err("WRONGTYPE Operation against a key holding the wrong kind of value")
}

pub fn not_integer() -> RespValue {
    err("ERR value is not an integer or out of range")
}

pub fn not_float() -> RespValue {
    err("ERR value is not a valid float")
}

pub fn syntax() -> RespValue {
    err("ERR syntax error")
}

pub fn noauth() -> RespValue {
    err("NOAUTH Authentication required")
}

pub fn db_index_out_of_range() -> RespValue {
    err("ERR DB index is out of range")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_to_vec;

    #[test]
    fn test_ok_wire_format() {
        assert_eq!(encode_to_vec(&ok()), b"+OK\r\n");
    }

    #[test]
    fn test_null_bulk_wire_format() {
        assert_eq!(encode_to_vec(&null_bulk()), b"$-1\r\n");
    }

    #[test]
    fn test_error_text() {
        let r = arg_num("get");
        match r {
            RespValue::Error(msg) => {
                assert_eq!(&msg[..], b"ERR wrong number of arguments for 'get' command")
            }
            other => panic!("expected error, got {other:?}"),
        }
    }
}
