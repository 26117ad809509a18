//! Value encoding.
//!
//! Every value starts with one tag byte:
//!
//! ```text
//!   1        null             2/3      true/false
//!   4        float64 zero     5        float64 + 8 bytes
//!   6/7/8    int64 in 2/4/8 bytes (offset binary)
//!   9/10/11  uint64 in 2/4/8 bytes
//!  14..=53   int64 -7..=32    54..=63  uint64 0..=9
//!  64        []               65..=94  array of 1..=30, +u32 total
//!  95        array, +u32 total +u32 count
//!  96..=127  maps, same scheme as arrays
//! 128        ""               129..=190 string of 1..=62 bytes
//! 191        string, +u32 (len + 6)     strings end with a NUL
//! 192        b""              193..=254 bytes of 1..=62
//! 255        bytes, +u32 (len + 5)
//! ```
//!
//! All multi-byte integers are little endian.

use super::{MAX_DEPTH, Stream};
use crate::error::CodecError;
use crate::value::Value;

/// Longest string or byte payload that fits the tag byte.
const INLINE_LEN_MAX: usize = 62;

/// Largest array or map count that fits the tag byte.
const INLINE_COUNT_MAX: usize = 30;

impl Stream {
    fn put_byte(&mut self, b: u8) {
        self.data.push(b);
    }

    fn put_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    fn set_u32_at(&mut self, pos: usize, v: u32) {
        self.data[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn write_null(&mut self) {
        self.put_byte(1);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.put_byte(if v { 2 } else { 3 });
    }

    /// NaN is rejected. Both zeros encode as the one-byte zero.
    pub fn write_float64(&mut self, v: f64) -> Result<(), CodecError> {
        if v.is_nan() {
            return Err(CodecError::Unsupported(String::new()));
        }
        if v == 0.0 {
            self.put_byte(4);
        } else {
            self.put_byte(5);
            self.put_u64(v.to_bits());
        }
        Ok(())
    }

    pub fn write_int64(&mut self, v: i64) {
        if (-7..=32).contains(&v) {
            self.put_byte((v + 21) as u8);
        } else if let Ok(v) = i16::try_from(v) {
            self.put_byte(6);
            self.put_u16(v as u16 ^ 0x8000);
        } else if let Ok(v) = i32::try_from(v) {
            self.put_byte(7);
            self.put_u32(v as u32 ^ 0x8000_0000);
        } else {
            self.put_byte(8);
            self.put_u64(v as u64 ^ 0x8000_0000_0000_0000);
        }
    }

    pub fn write_uint64(&mut self, v: u64) {
        if v < 10 {
            self.put_byte(v as u8 + 54);
        } else if let Ok(v) = u16::try_from(v) {
            self.put_byte(9);
            self.put_u16(v);
        } else if let Ok(v) = u32::try_from(v) {
            self.put_byte(10);
            self.put_u32(v);
        } else {
            self.put_byte(11);
            self.put_u64(v);
        }
    }

    pub fn write_string(&mut self, v: &str) -> Result<(), CodecError> {
        let bytes = v.as_bytes();
        let len = bytes.len();
        if len == 0 {
            self.put_byte(128);
        } else if len <= INLINE_LEN_MAX {
            self.put_byte(len as u8 + 128);
            self.put_bytes(bytes);
            self.put_byte(0);
        } else {
            let prefix = u32::try_from(len + 6)
                .map_err(|_| CodecError::Unsupported(String::new()))?;
            self.put_byte(191);
            self.put_u32(prefix);
            self.put_bytes(bytes);
            self.put_byte(0);
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> Result<(), CodecError> {
        let len = v.len();
        if len == 0 {
            self.put_byte(192);
        } else if len <= INLINE_LEN_MAX {
            self.put_byte(len as u8 + 192);
            self.put_bytes(v);
        } else {
            let prefix = u32::try_from(len + 5)
                .map_err(|_| CodecError::Unsupported(String::new()))?;
            self.put_byte(255);
            self.put_u32(prefix);
            self.put_bytes(v);
        }
        Ok(())
    }

    /// Write the collection header and return its start offset.
    ///
    /// `empty_tag` is 64 for arrays and 96 for maps; `empty_tag + 31` is
    /// the tag of the large form.
    fn begin_collection(&mut self, empty_tag: u8, count: usize) -> Result<usize, CodecError> {
        let start = self.write_pos();
        if count > INLINE_COUNT_MAX {
            let count = u32::try_from(count).map_err(|_| CodecError::Unsupported(String::new()))?;
            self.put_byte(empty_tag + 31);
            self.put_u32(0);
            self.put_u32(count);
        } else {
            self.put_byte(empty_tag + count as u8);
            self.put_u32(0);
        }
        Ok(start)
    }

    fn end_collection(&mut self, start: usize) -> Result<(), CodecError> {
        let total = u32::try_from(self.write_pos() - start)
            .map_err(|_| CodecError::Unsupported(String::new()))?;
        self.set_u32_at(start + 1, total);
        Ok(())
    }

    fn write_array(&mut self, v: &[Value], depth: usize) -> Result<(), CodecError> {
        if v.is_empty() {
            self.put_byte(64);
            return Ok(());
        }
        let start = self.begin_collection(64, v.len())?;
        for (i, item) in v.iter().enumerate() {
            self.write_inner(item, depth - 1)
                .map_err(|e| e.nest(&format!("[{i}]")))?;
        }
        self.end_collection(start)
    }

    fn write_map(&mut self, v: &crate::value::ValueMap, depth: usize) -> Result<(), CodecError> {
        if v.is_empty() {
            self.put_byte(96);
            return Ok(());
        }
        let start = self.begin_collection(96, v.len())?;
        for (key, item) in v {
            let segment = || format!("[\"{key}\"]");
            self.write_string(key).map_err(|e| e.nest(&segment()))?;
            self.write_inner(item, depth - 1)
                .map_err(|e| e.nest(&segment()))?;
        }
        self.end_collection(start)
    }

    fn write_inner(&mut self, v: &Value, depth: usize) -> Result<(), CodecError> {
        if depth == 0 {
            return Err(CodecError::Overflow(String::new()));
        }
        match v {
            Value::Null => self.write_null(),
            Value::Bool(b) => self.write_bool(*b),
            Value::Int64(i) => self.write_int64(*i),
            Value::Uint64(u) => self.write_uint64(*u),
            Value::Float64(f) => self.write_float64(*f)?,
            Value::String(s) => self.write_string(s)?,
            Value::Bytes(b) => self.write_bytes(b)?,
            Value::Array(a) => self.write_array(a, depth)?,
            Value::Map(m) => self.write_map(m, depth)?,
        }
        Ok(())
    }

    /// Write one value.
    ///
    /// On failure nothing is written: the write cursor is restored to where
    /// it was before the call.
    pub fn write(&mut self, v: &Value) -> Result<(), CodecError> {
        let start = self.write_pos();
        let ret = self.write_inner(v, MAX_DEPTH);
        if ret.is_err() {
            self.data.truncate(start);
        }
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::super::BODY_POS;
    use super::*;

    fn body(v: &Value) -> Vec<u8> {
        let mut s = Stream::new();
        s.write(v).unwrap();
        s.buffer()[BODY_POS..].to_vec()
    }

    fn nested(levels: usize) -> Value {
        let mut v = Value::Array(Vec::new());
        for _ in 1..levels {
            v = Value::Array(vec![v]);
        }
        v
    }

    #[test]
    fn one_byte_values() {
        assert_eq!(body(&Value::Null), [1]);
        assert_eq!(body(&Value::Bool(true)), [2]);
        assert_eq!(body(&Value::Bool(false)), [3]);
        assert_eq!(body(&Value::Float64(0.0)), [4]);
        assert_eq!(body(&Value::Int64(-7)), [14]);
        assert_eq!(body(&Value::Int64(0)), [21]);
        assert_eq!(body(&Value::Int64(32)), [53]);
        assert_eq!(body(&Value::Uint64(0)), [54]);
        assert_eq!(body(&Value::Uint64(9)), [63]);
        assert_eq!(body(&Value::from("")), [128]);
        assert_eq!(body(&Value::Bytes(Vec::new())), [192]);
        assert_eq!(body(&Value::Array(Vec::new())), [64]);
        assert_eq!(body(&Value::Map(Default::default())), [96]);
    }

    #[test]
    fn wide_integers() {
        assert_eq!(body(&Value::Int64(-8)), [6, 0xF8, 0x7F]);
        assert_eq!(body(&Value::Int64(33)), [6, 0x21, 0x80]);
        assert_eq!(body(&Value::Int64(32768)), [7, 0x00, 0x80, 0x00, 0x80]);
        assert_eq!(
            body(&Value::Int64(-(1 << 53) + 1)),
            [8, 0x01, 0, 0, 0, 0, 0, 0xE0, 0x7F]
        );
        assert_eq!(
            body(&Value::Int64((1 << 53) - 1)),
            [8, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x1F, 0x80]
        );
        assert_eq!(body(&Value::Uint64(10)), [9, 10, 0]);
        assert_eq!(body(&Value::Uint64(65536)), [10, 0, 0, 1, 0]);
        assert_eq!(body(&Value::Uint64(u64::MAX)), [11, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn strings() {
        assert_eq!(body(&Value::from("a")), [129, b'a', 0]);
        let inline = "x".repeat(62);
        let encoded = body(&Value::from(inline.as_str()));
        assert_eq!(encoded[0], 190);
        assert_eq!(encoded.len(), 64);
        let long = "y".repeat(63);
        let encoded = body(&Value::from(long.as_str()));
        assert_eq!(encoded[..5], [191, 69, 0, 0, 0]);
        assert_eq!(encoded.len(), 69);
        assert_eq!(*encoded.last().unwrap(), 0);
    }

    #[test]
    fn bytes() {
        assert_eq!(body(&Value::Bytes(vec![7])), [193, 7]);
        let encoded = body(&Value::Bytes(vec![1; 63]));
        assert_eq!(encoded[..5], [255, 68, 0, 0, 0]);
        assert_eq!(encoded.len(), 68);
    }

    #[test]
    fn collection_headers() {
        let small = body(&Value::Array(vec![Value::Bool(true), Value::Null]));
        assert_eq!(small, [66, 7, 0, 0, 0, 2, 1]);

        let large = body(&Value::Array(vec![Value::Null; 31]));
        assert_eq!(large[0], 95);
        assert_eq!(large[1..5], 40u32.to_le_bytes());
        assert_eq!(large[5..9], 31u32.to_le_bytes());

        let mut map = crate::value::ValueMap::new();
        map.insert("k".into(), Value::Int64(1));
        assert_eq!(body(&Value::Map(map)), [97, 9, 0, 0, 0, 129, b'k', 0, 22]);
    }

    #[test]
    fn nan_is_rejected_atomically() {
        let mut s = Stream::new();
        s.write_int64(1000);
        let before = s.write_pos();
        let err = s
            .write(&Value::Array(vec![Value::Int64(1), Value::Float64(f64::NAN)]))
            .unwrap_err();
        assert_eq!(err.to_string(), "value[1] is not supported");
        assert_eq!(s.write_pos(), before);
    }

    #[test]
    fn depth_limit() {
        let mut s = Stream::new();
        assert!(s.write(&nested(MAX_DEPTH)).is_ok());

        let mut s = Stream::new();
        let err = s.write(&nested(MAX_DEPTH + 1)).unwrap_err();
        assert!(matches!(err, CodecError::Overflow(_)));
        assert_eq!(s.write_pos(), BODY_POS);
    }

    #[test]
    fn map_depth_limit() {
        fn nested_map(levels: usize) -> Value {
            let mut v = Value::Map(Default::default());
            for _ in 1..levels {
                let mut outer = crate::value::ValueMap::new();
                outer.insert("k".into(), v);
                v = Value::Map(outer);
            }
            v
        }

        let mut s = Stream::new();
        assert!(s.write(&nested_map(MAX_DEPTH)).is_ok());

        let mut s = Stream::new();
        let err = s.write(&nested_map(MAX_DEPTH + 1)).unwrap_err();
        assert_eq!(err, CodecError::Overflow("[\"k\"]".repeat(MAX_DEPTH)));
        assert_eq!(s.write_pos(), BODY_POS);
    }

    #[test]
    fn map_error_path() {
        let mut inner = crate::value::ValueMap::new();
        inner.insert("name".into(), Value::Float64(f64::NAN));
        let v = Value::Array(vec![Value::Null, Value::Null, Value::Map(inner)]);
        let err = Stream::new().write(&v).unwrap_err();
        assert_eq!(err.to_string(), "value[2][\"name\"] is not supported");
    }
}
