//! Value decoding.
//!
//! Parsing works on positions and only moves the stream's read cursor once
//! a whole value has been decoded, so a failed read leaves the cursor where
//! it was.

use super::{MAX_DEPTH, Stream};
use crate::error::CodecError;
use crate::value::{Value, ValueMap};

type Parsed<T> = Result<(T, usize), CodecError>;

impl Stream {
    fn byte_at(&self, pos: usize) -> Result<u8, CodecError> {
        self.data.get(pos).copied().ok_or(CodecError::Malformed(pos))
    }

    fn slice_at(&self, pos: usize, len: usize) -> Result<&[u8], CodecError> {
        pos.checked_add(len)
            .and_then(|end| self.data.get(pos..end))
            .ok_or(CodecError::Malformed(pos))
    }

    fn array_at<const N: usize>(&self, pos: usize) -> Result<[u8; N], CodecError> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.slice_at(pos, N)?);
        Ok(raw)
    }

    fn u32_at(&self, pos: usize) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array_at(pos)?))
    }

    // ── Scalars ──────────────────────────────────────────────────

    fn parse_int64(&self, pos: usize) -> Parsed<i64> {
        match self.byte_at(pos)? {
            tag @ 14..=53 => Ok((tag as i64 - 21, pos + 1)),
            6 => {
                let raw = u16::from_le_bytes(self.array_at(pos + 1)?);
                Ok(((raw ^ 0x8000) as i16 as i64, pos + 3))
            }
            7 => {
                let raw = u32::from_le_bytes(self.array_at(pos + 1)?);
                Ok(((raw ^ 0x8000_0000) as i32 as i64, pos + 5))
            }
            8 => {
                let raw = u64::from_le_bytes(self.array_at(pos + 1)?);
                Ok(((raw ^ 0x8000_0000_0000_0000) as i64, pos + 9))
            }
            _ => Err(CodecError::Malformed(pos)),
        }
    }

    fn parse_uint64(&self, pos: usize) -> Parsed<u64> {
        match self.byte_at(pos)? {
            tag @ 54..=63 => Ok((tag as u64 - 54, pos + 1)),
            9 => Ok((u16::from_le_bytes(self.array_at(pos + 1)?) as u64, pos + 3)),
            10 => Ok((self.u32_at(pos + 1)? as u64, pos + 5)),
            11 => Ok((u64::from_le_bytes(self.array_at(pos + 1)?), pos + 9)),
            _ => Err(CodecError::Malformed(pos)),
        }
    }

    fn parse_float64(&self, pos: usize) -> Parsed<f64> {
        match self.byte_at(pos)? {
            4 => Ok((0.0, pos + 1)),
            5 => Ok((f64::from_bits(u64::from_le_bytes(self.array_at(pos + 1)?)), pos + 9)),
            _ => Err(CodecError::Malformed(pos)),
        }
    }

    fn parse_bool(&self, pos: usize) -> Parsed<bool> {
        match self.byte_at(pos)? {
            2 => Ok((true, pos + 1)),
            3 => Ok((false, pos + 1)),
            _ => Err(CodecError::Malformed(pos)),
        }
    }

    /// Long-form length: the prefix counts `overhead` extra bytes and must
    /// describe a payload too long for the inline form.
    fn long_len(&self, pos: usize, overhead: u32) -> Result<usize, CodecError> {
        match self.u32_at(pos + 1)?.checked_sub(overhead) {
            Some(len) if len > 62 => Ok(len as usize),
            _ => Err(CodecError::Malformed(pos)),
        }
    }

    fn parse_string(&self, pos: usize) -> Parsed<String> {
        let (len, start) = match self.byte_at(pos)? {
            128 => return Ok((String::new(), pos + 1)),
            tag @ 129..=190 => ((tag - 128) as usize, pos + 1),
            191 => (self.long_len(pos, 6)?, pos + 5),
            _ => return Err(CodecError::Malformed(pos)),
        };
        let raw = self.slice_at(start, len + 1)?;
        if raw[len] != 0 {
            return Err(CodecError::Malformed(start + len));
        }
        let s = std::str::from_utf8(&raw[..len]).map_err(|_| CodecError::Malformed(start))?;
        Ok((s.to_string(), start + len + 1))
    }

    fn parse_bytes(&self, pos: usize) -> Parsed<Vec<u8>> {
        let (len, start) = match self.byte_at(pos)? {
            192 => return Ok((Vec::new(), pos + 1)),
            tag @ 193..=254 => ((tag - 192) as usize, pos + 1),
            255 => (self.long_len(pos, 5)?, pos + 5),
            _ => return Err(CodecError::Malformed(pos)),
        };
        Ok((self.slice_at(start, len)?.to_vec(), start + len))
    }

    // ── Collections ──────────────────────────────────────────────

    /// Parse a collection header. Returns `(count, total_len, first_item)`;
    /// a count of zero means the one-byte empty form.
    fn collection_header(&self, pos: usize, empty_tag: u8) -> Result<(usize, usize, usize), CodecError> {
        let tag = self.byte_at(pos)?;
        if tag == empty_tag {
            return Ok((0, 1, pos + 1));
        }
        if tag == empty_tag + 31 {
            let total = self.u32_at(pos + 1)? as usize;
            let count = self.u32_at(pos + 5)? as usize;
            if count == 0 {
                return Err(CodecError::Malformed(pos));
            }
            Ok((count, total, pos + 9))
        } else if tag > empty_tag && tag < empty_tag + 31 {
            let total = self.u32_at(pos + 1)? as usize;
            Ok(((tag - empty_tag) as usize, total, pos + 5))
        } else {
            Err(CodecError::Malformed(pos))
        }
    }

    fn parse_array(&self, pos: usize, depth: usize) -> Parsed<Vec<Value>> {
        let (count, total, mut cur) = self.collection_header(pos, 64)?;
        if count == 0 {
            return Ok((Vec::new(), cur));
        }
        // every element takes at least one byte
        let mut ret = Vec::with_capacity(count.min(self.data.len() - cur));
        for _ in 0..count {
            let (v, next) = self.parse(cur, depth - 1)?;
            ret.push(v);
            cur = next;
        }
        if cur != pos + total {
            return Err(CodecError::Malformed(pos));
        }
        Ok((ret, cur))
    }

    fn parse_map(&self, pos: usize, depth: usize) -> Parsed<ValueMap> {
        let (count, total, mut cur) = self.collection_header(pos, 96)?;
        if count == 0 {
            return Ok((ValueMap::new(), cur));
        }
        let mut ret = ValueMap::new();
        for _ in 0..count {
            let (key, next) = self.parse_string(cur)?;
            let (v, next) = self.parse(next, depth - 1)?;
            if ret.insert(key, v).is_some() {
                return Err(CodecError::Malformed(cur));
            }
            cur = next;
        }
        if cur != pos + total {
            return Err(CodecError::Malformed(pos));
        }
        Ok((ret, cur))
    }

    fn parse(&self, pos: usize, depth: usize) -> Parsed<Value> {
        if depth == 0 {
            return Err(CodecError::Overflow(String::new()));
        }
        match self.byte_at(pos)? {
            1 => Ok((Value::Null, pos + 1)),
            2 | 3 => self.parse_bool(pos).map(|(v, p)| (Value::Bool(v), p)),
            4 | 5 => self.parse_float64(pos).map(|(v, p)| (Value::Float64(v), p)),
            6..=8 | 14..=53 => self.parse_int64(pos).map(|(v, p)| (Value::Int64(v), p)),
            9..=11 | 54..=63 => self.parse_uint64(pos).map(|(v, p)| (Value::Uint64(v), p)),
            64..=95 => self.parse_array(pos, depth).map(|(v, p)| (Value::Array(v), p)),
            96..=127 => self.parse_map(pos, depth).map(|(v, p)| (Value::Map(v), p)),
            128..=191 => self.parse_string(pos).map(|(v, p)| (Value::String(v), p)),
            192..=255 => self.parse_bytes(pos).map(|(v, p)| (Value::Bytes(v), p)),
            // 0 and the reserved tags 12, 13
            _ => Err(CodecError::Malformed(pos)),
        }
    }

    fn commit<T>(&mut self, parsed: Parsed<T>) -> Result<T, CodecError> {
        let (v, next) = parsed?;
        self.read_pos = next;
        Ok(v)
    }

    // ── Public readers ───────────────────────────────────────────

    pub fn read_null(&mut self) -> Result<(), CodecError> {
        let pos = self.read_pos;
        match self.byte_at(pos)? {
            1 => {
                self.read_pos = pos + 1;
                Ok(())
            }
            _ => Err(CodecError::Malformed(pos)),
        }
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        let parsed = self.parse_bool(self.read_pos);
        self.commit(parsed)
    }

    pub fn read_float64(&mut self) -> Result<f64, CodecError> {
        let parsed = self.parse_float64(self.read_pos);
        self.commit(parsed)
    }

    pub fn read_int64(&mut self) -> Result<i64, CodecError> {
        let parsed = self.parse_int64(self.read_pos);
        self.commit(parsed)
    }

    pub fn read_uint64(&mut self) -> Result<u64, CodecError> {
        let parsed = self.parse_uint64(self.read_pos);
        self.commit(parsed)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let parsed = self.parse_string(self.read_pos);
        self.commit(parsed)
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let parsed = self.parse_bytes(self.read_pos);
        self.commit(parsed)
    }

    pub fn read_array(&mut self) -> Result<Vec<Value>, CodecError> {
        let parsed = self.parse_array(self.read_pos, MAX_DEPTH);
        self.commit(parsed)
    }

    pub fn read_map(&mut self) -> Result<ValueMap, CodecError> {
        let parsed = self.parse_map(self.read_pos, MAX_DEPTH);
        self.commit(parsed)
    }

    /// Read the next value of any type.
    pub fn read(&mut self) -> Result<Value, CodecError> {
        let parsed = self.parse(self.read_pos, MAX_DEPTH);
        self.commit(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::BODY_POS;
    use super::*;
    use crate::value::{MAX_SAFE_INTEGER, MIN_SAFE_INTEGER};

    fn roundtrip(v: Value) {
        let mut s = Stream::new();
        s.write(&v).unwrap();
        s.build_check();
        let mut received = Stream::from_bytes(s.into_bytes()).unwrap();
        assert!(received.check());
        assert_eq!(received.read().unwrap(), v);
        assert!(received.is_read_finish());
    }

    fn raw(body: &[u8]) -> Stream {
        let mut s = Stream::new();
        s.put_bytes(body);
        s
    }

    #[test]
    fn scalar_roundtrip() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
        roundtrip(Value::Float64(0.0));
        roundtrip(Value::Float64(-1.5e300));
        roundtrip(Value::Float64(f64::INFINITY));
        roundtrip(Value::from(""));
        roundtrip(Value::from("x".repeat(62)));
        roundtrip(Value::from("y".repeat(63)));
        roundtrip(Value::from("héllo kitty 🐱"));
        roundtrip(Value::Bytes(Vec::new()));
        roundtrip(Value::Bytes(vec![0; 62]));
        roundtrip(Value::Bytes((0..=255).collect()));
    }

    #[test]
    fn integer_boundaries() {
        for v in [
            0, 1, -1, -7, -8, 32, 33, -32768, 32767, -32769, 32768,
            i32::MIN as i64, i32::MAX as i64, i32::MIN as i64 - 1, i32::MAX as i64 + 1,
            MAX_SAFE_INTEGER, MIN_SAFE_INTEGER, MAX_SAFE_INTEGER + 1, MIN_SAFE_INTEGER - 1,
            i64::MIN, i64::MAX,
        ] {
            roundtrip(Value::Int64(v));
        }
        for v in [0, 9, 10, 65535, 65536, u32::MAX as u64, u32::MAX as u64 + 1,
                  MAX_SAFE_INTEGER as u64, u64::MAX] {
            roundtrip(Value::Uint64(v));
        }
    }

    #[test]
    fn collection_roundtrip() {
        roundtrip(Value::Array(Vec::new()));
        roundtrip(Value::Array(vec![Value::Int64(1); 30]));
        roundtrip(Value::Array((0..5000).map(Value::Int64).collect()));
        roundtrip(Value::Map(ValueMap::new()));

        let mut map = ValueMap::new();
        for i in 0..100 {
            map.insert(format!("key{i}"), Value::Array(vec![Value::from(i as u64), Value::Null]));
        }
        roundtrip(Value::Map(map.clone()));

        let mut outer = ValueMap::new();
        outer.insert("inner".into(), Value::Map(map));
        outer.insert("bytes".into(), Value::Bytes(vec![1, 2, 3]));
        roundtrip(Value::Map(outer));
    }

    #[test]
    fn typed_readers() {
        let mut s = Stream::new();
        s.write_string("#.user:SayHello").unwrap();
        s.write_int64(-100_000);
        s.write_uint64(7);
        s.write_null();
        s.write_bool(false);

        assert_eq!(s.read_string().unwrap(), "#.user:SayHello");
        assert!(s.read_uint64().is_err());
        assert_eq!(s.read_int64().unwrap(), -100_000);
        assert_eq!(s.read_uint64().unwrap(), 7);
        s.read_null().unwrap();
        assert!(!s.read_bool().unwrap());
        assert!(s.is_read_finish());
        assert!(s.read().is_err());
    }

    #[test]
    fn failed_read_keeps_cursor() {
        let mut s = raw(&[66, 7, 0, 0, 0, 2, 12]);
        assert!(s.read().is_err());
        assert_eq!(s.read_pos(), BODY_POS);
    }

    #[test]
    fn string_rejects_bad_terminator_and_utf8() {
        assert!(raw(&[129, b'a', 1]).read_string().is_err());
        assert!(raw(&[130, 0xC3, 0x28, 0]).read_string().is_err());
        assert!(raw(&[129, b'a']).read_string().is_err());
    }

    #[test]
    fn long_form_must_be_long() {
        // a 5-byte string in the long form is malformed
        let mut body = vec![191];
        body.extend_from_slice(&11u32.to_le_bytes());
        body.extend_from_slice(b"hello\0");
        assert!(raw(&body).read().is_err());
    }

    #[test]
    fn collection_length_must_match() {
        assert!(raw(&[66, 8, 0, 0, 0, 2, 1]).read().is_err());
        assert_eq!(
            raw(&[66, 7, 0, 0, 0, 2, 1]).read().unwrap(),
            Value::Array(vec![Value::Bool(true), Value::Null])
        );
    }

    #[test]
    fn reserved_tags() {
        assert!(raw(&[0]).read().is_err());
        assert!(raw(&[12]).read().is_err());
        assert!(raw(&[13]).read().is_err());
    }

    #[test]
    fn read_depth_limit() {
        fn nest(levels: usize) -> Vec<u8> {
            let mut body = vec![64];
            for _ in 1..levels {
                let mut outer = vec![65];
                outer.extend_from_slice(&(5 + body.len() as u32).to_le_bytes());
                outer.extend_from_slice(&body);
                body = outer;
            }
            body
        }
        assert!(raw(&nest(MAX_DEPTH)).read().is_ok());
        assert!(matches!(
            raw(&nest(MAX_DEPTH + 1)).read(),
            Err(CodecError::Overflow(_))
        ));
    }

    #[test]
    fn read_map_depth_limit() {
        fn nest(levels: usize) -> Vec<u8> {
            let mut body = vec![96];
            for _ in 1..levels {
                let mut outer = vec![97];
                outer.extend_from_slice(&(8 + body.len() as u32).to_le_bytes());
                outer.extend_from_slice(&[129, b'k', 0]);
                outer.extend_from_slice(&body);
                body = outer;
            }
            body
        }
        let mut s = raw(&nest(MAX_DEPTH));
        assert!(matches!(s.read(), Ok(Value::Map(_))));
        assert!(s.is_read_finish());

        let mut s = raw(&nest(MAX_DEPTH + 1));
        assert!(matches!(s.read(), Err(CodecError::Overflow(_))));
        assert_eq!(s.read_pos(), BODY_POS);
    }

    #[test]
    fn duplicate_map_key_is_malformed() {
        // count 2, key "a" twice
        let body = [98, 13, 0, 0, 0, 129, b'a', 0, 22, 129, b'a', 0, 23];
        let mut s = raw(&body);
        assert_eq!(s.read(), Err(CodecError::Malformed(BODY_POS + 9)));
        assert_eq!(s.read_pos(), BODY_POS);

        let distinct = [98, 13, 0, 0, 0, 129, b'a', 0, 22, 129, b'b', 0, 23];
        assert!(raw(&distinct).read_map().is_ok());
    }

    #[test]
    fn huge_count_does_not_allocate() {
        let mut body = vec![95];
        body.extend_from_slice(&9u32.to_le_bytes());
        body.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(raw(&body).read().is_err());
    }
}
