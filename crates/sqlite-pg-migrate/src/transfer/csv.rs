//! CSV encoding of normalized rows for `COPY ... WITH (FORMAT csv)`.
//!
//! PostgreSQL's CSV mode reads an unquoted empty field as NULL and a quoted
//! empty field as an empty string. The encoder relies on exactly that.

use std::fmt::Write as _;

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::value::SqlValue;

/// Rough per-record size used to pre-size buffers.
const BYTES_PER_RECORD_HINT: usize = 128;

/// One batch of CSV records headed for the COPY sink.
#[derive(Debug, Default)]
pub struct TransferBuffer {
    buf: BytesMut,
    records: usize,
}

impl TransferBuffer {
    pub fn with_capacity(records: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(records * BYTES_PER_RECORD_HINT),
            records: 0,
        }
    }

    /// Append one record terminated by `\n`.
    pub fn push_record(&mut self, values: &[SqlValue]) {
        for (idx, value) in values.iter().enumerate() {
            if idx > 0 {
                self.buf.put_u8(b',');
            }
            write_field(&mut self.buf, value);
        }
        self.buf.put_u8(b'\n');
        self.records += 1;
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

fn write_field(buf: &mut BytesMut, value: &SqlValue) {
    match value {
        SqlValue::Null => {}
        SqlValue::Integer(i) => {
            let _ = write!(buf, "{}", i);
        }
        SqlValue::Real(f) => write_real(buf, *f),
        SqlValue::Text(s) => write_text(buf, s),
        SqlValue::Json(v) => write_text(buf, &v.to_string()),
        SqlValue::Blob(bytes) => {
            buf.put_slice(b"\\x");
            buf.put_slice(hex::encode(bytes).as_bytes());
        }
    }
}

fn write_real(buf: &mut BytesMut, f: f64) {
    if f.is_nan() {
        buf.put_slice(b"NaN");
    } else if f == f64::INFINITY {
        buf.put_slice(b"Infinity");
    } else if f == f64::NEG_INFINITY {
        buf.put_slice(b"-Infinity");
    } else {
        let _ = write!(buf, "{}", f);
    }
}

fn write_text(buf: &mut BytesMut, s: &str) {
    if !needs_quotes(s) {
        buf.put_slice(s.as_bytes());
        return;
    }
    buf.put_u8(b'"');
    for chunk in s.split_inclusive('"') {
        buf.put_slice(chunk.as_bytes());
        if chunk.ends_with('"') {
            buf.put_u8(b'"');
        }
    }
    buf.put_u8(b'"');
}

/// Empty strings are quoted so they are not read back as NULL, and a lone
/// `\.` would otherwise end the copy stream.
fn needs_quotes(s: &str) -> bool {
    s.is_empty() || s == "\\." || s.contains([',', '"', '\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(values: &[SqlValue]) -> String {
        let mut buffer = TransferBuffer::with_capacity(1);
        buffer.push_record(values);
        String::from_utf8(buffer.freeze().to_vec()).unwrap()
    }

    #[test]
    fn test_json_text_is_quoted_with_doubled_quotes() {
        assert_eq!(
            encode(&[SqlValue::Integer(1), SqlValue::from(r#"{"a": 1}"#)]),
            "1,\"{\"\"a\"\": 1}\"\n"
        );
    }

    #[test]
    fn test_null_versus_empty_string() {
        assert_eq!(
            encode(&[SqlValue::Null, SqlValue::from(""), SqlValue::Null]),
            ",\"\",\n"
        );
    }

    #[test]
    fn test_plain_text_is_unquoted() {
        assert_eq!(encode(&[SqlValue::from("hello world")]), "hello world\n");
    }

    #[test]
    fn test_delimiters_and_newlines_are_quoted() {
        assert_eq!(encode(&[SqlValue::from("a,b")]), "\"a,b\"\n");
        assert_eq!(encode(&[SqlValue::from("line1\nline2")]), "\"line1\nline2\"\n");
        assert_eq!(encode(&[SqlValue::from("cr\rhere")]), "\"cr\rhere\"\n");
    }

    #[test]
    fn test_end_of_data_marker_is_quoted() {
        assert_eq!(encode(&[SqlValue::from("\\.")]), "\"\\.\"\n");
        assert_eq!(encode(&[SqlValue::from("a\\.b")]), "a\\.b\n");
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            encode(&[
                SqlValue::Integer(-42),
                SqlValue::Real(2.5),
                SqlValue::Real(0.1),
                SqlValue::Real(f64::NAN),
                SqlValue::Real(f64::INFINITY),
                SqlValue::Real(f64::NEG_INFINITY),
            ]),
            "-42,2.5,0.1,NaN,Infinity,-Infinity\n"
        );
    }

    #[test]
    fn test_blob_uses_bytea_hex() {
        assert_eq!(
            encode(&[SqlValue::Blob(vec![0x00, 0xab, 0xff])]),
            "\\x00abff\n"
        );
    }

    #[test]
    fn test_structured_json_is_serialized() {
        assert_eq!(
            encode(&[SqlValue::Json(json!({"k": "v"}))]),
            "\"{\"\"k\"\":\"\"v\"\"}\"\n"
        );
    }

    #[test]
    fn test_record_count_and_size() {
        let mut buffer = TransferBuffer::with_capacity(4);
        assert!(buffer.is_empty());
        buffer.push_record(&[SqlValue::Integer(1)]);
        buffer.push_record(&[SqlValue::Integer(22)]);
        assert_eq!(buffer.records(), 2);
        assert_eq!(buffer.len(), "1\n22\n".len());
    }
}
