//! Canonical object packer
//!
//! Serializes values into a deterministic byte stream (similar to BSON) so
//! that independent processes can hash the same logical object to the same
//! identifier. Encoding is one-directional; there is no decoder.
//!
//! | Tag | Kind           | Payload                                            |
//! |-----|----------------|----------------------------------------------------|
//! | 0   | absent/unknown | none                                               |
//! | 1   | false          | none                                               |
//! | 2   | true           | none                                               |
//! | 3   | number         | IEEE-754 double, big endian                        |
//! | 4   | text           | u64 BE byte length, UTF-8 bytes                    |
//! | 5   | list           | u64 BE length, packed elements                     |
//! | 6   | map            | u64 BE length, (u64 BE key length, key, value)...  |
//!
//! Map entries are ordered by key bytes. Every numeric type is widened to
//! `f64` before encoding, so `42u8`, `42i64` and `42.0` pack identically.
//! Integers beyond 2^53 lose precision; identifiers computed elsewhere rely
//! on exactly this behavior.
//!
//! There is no runtime fallback for unsupported kinds: a type without a
//! [`Packable`] impl is rejected at compile time. Tag 0 is produced only by
//! `()`, `None` and JSON `null`.
//!
//! ```compile_fail
//! monsync::common::pack(&std::time::Instant::now());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};

const TAG_ABSENT: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_NUMBER: u8 = 3;
const TAG_TEXT: u8 = 4;
const TAG_LIST: u8 = 5;
const TAG_MAP: u8 = 6;

/// A value with a canonical packed representation
pub trait Packable {
    fn pack_into(&self, buf: &mut Vec<u8>);
}

/// Pack a value into a fresh buffer
pub fn pack<T: Packable + ?Sized>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.pack_into(&mut buf);
    buf
}

/// Streams the packed form of an object into a writer
pub struct ObjectPacker<'a, T: Packable + ?Sized> {
    object: &'a T,
}

impl<'a, T: Packable + ?Sized> ObjectPacker<'a, T> {
    pub fn new(object: &'a T) -> Self {
        Self { object }
    }

    /// Write the packed bytes to `w`, returning how many were written
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<u64> {
        let buf = pack(self.object);
        w.write_all(&buf)?;
        Ok(buf.len() as u64)
    }
}

fn put_len(buf: &mut Vec<u8>, len: usize) {
    buf.extend_from_slice(&(len as u64).to_be_bytes());
}

fn put_number(buf: &mut Vec<u8>, n: f64) {
    buf.push(TAG_NUMBER);
    buf.extend_from_slice(&n.to_bits().to_be_bytes());
}

fn put_text(buf: &mut Vec<u8>, s: &str) {
    buf.push(TAG_TEXT);
    put_len(buf, s.len());
    buf.extend_from_slice(s.as_bytes());
}

fn put_list<'a, T, I>(buf: &mut Vec<u8>, len: usize, items: I)
where
    T: Packable + ?Sized + 'a,
    I: IntoIterator<Item = &'a T>,
{
    buf.push(TAG_LIST);
    put_len(buf, len);
    for item in items {
        item.pack_into(buf);
    }
}

/// Entries must already be sorted by key.
fn put_sorted_map<'a, V, I>(buf: &mut Vec<u8>, len: usize, entries: I)
where
    V: Packable + ?Sized + 'a,
    I: IntoIterator<Item = (&'a str, &'a V)>,
{
    buf.push(TAG_MAP);
    put_len(buf, len);
    for (key, value) in entries {
        put_len(buf, key.len());
        buf.extend_from_slice(key.as_bytes());
        value.pack_into(buf);
    }
}

macro_rules! packable_number {
    ($($t:ty),*) => {
        $(
            impl Packable for $t {
                fn pack_into(&self, buf: &mut Vec<u8>) {
                    put_number(buf, *self as f64);
                }
            }
        )*
    };
}

packable_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl Packable for bool {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        buf.push(if *self { TAG_TRUE } else { TAG_FALSE });
    }
}

impl Packable for () {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        buf.push(TAG_ABSENT);
    }
}

impl Packable for str {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        put_text(buf, self);
    }
}

impl Packable for String {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        put_text(buf, self);
    }
}

impl<T: Packable + ?Sized> Packable for &T {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        (**self).pack_into(buf);
    }
}

impl<T: Packable + ?Sized> Packable for Box<T> {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        (**self).pack_into(buf);
    }
}

impl<T: Packable> Packable for Option<T> {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        match self {
            Some(value) => value.pack_into(buf),
            None => buf.push(TAG_ABSENT),
        }
    }
}

impl<T: Packable> Packable for [T] {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        put_list(buf, self.len(), self.iter());
    }
}

impl<T: Packable, const N: usize> Packable for [T; N] {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        put_list(buf, N, self.iter());
    }
}

impl<T: Packable> Packable for Vec<T> {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        put_list(buf, self.len(), self.iter());
    }
}

impl<A: Packable, B: Packable> Packable for (A, B) {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        buf.push(TAG_LIST);
        put_len(buf, 2);
        self.0.pack_into(buf);
        self.1.pack_into(buf);
    }
}

impl<A: Packable, B: Packable, C: Packable> Packable for (A, B, C) {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        buf.push(TAG_LIST);
        put_len(buf, 3);
        self.0.pack_into(buf);
        self.1.pack_into(buf);
        self.2.pack_into(buf);
    }
}

impl<V: Packable> Packable for BTreeMap<String, V> {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        put_sorted_map(buf, self.len(), self.iter().map(|(k, v)| (k.as_str(), v)));
    }
}

impl<V: Packable, S> Packable for HashMap<String, V, S> {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        let mut entries: Vec<(&str, &V)> = self.iter().map(|(k, v)| (k.as_str(), v)).collect();
        entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
        put_sorted_map(buf, entries.len(), entries);
    }
}

impl Packable for serde_json::Value {
    fn pack_into(&self, buf: &mut Vec<u8>) {
        use serde_json::Value;

        match self {
            Value::Null => buf.push(TAG_ABSENT),
            Value::Bool(b) => b.pack_into(buf),
            // Every JSON number (u64, i64 or f64) has an f64 view.
            Value::Number(n) => match n.as_f64() {
                Some(f) => put_number(buf, f),
                None => buf.push(TAG_ABSENT),
            },
            Value::String(s) => put_text(buf, s),
            Value::Array(items) => put_list(buf, items.len(), items.iter()),
            Value::Object(map) => {
                let mut entries: Vec<(&str, &Value)> =
                    map.iter().map(|(k, v)| (k.as_str(), v)).collect();
                entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
                put_sorted_map(buf, entries.len(), entries);
            }
        }
    }
}
