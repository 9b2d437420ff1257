//! Pack-format payload codec.
//!
//! The catalogue describes every register, command, and event payload with a
//! compact format string: `"u16 u8 x[1] r: u32"` reads as a little-endian
//! u16, a u8, one padding byte, then a trailing repetition of u32 values.
//!
//! Supported tokens:
//! - fixed-width integers `u8 u16 u32 u64`, `i8 i16 i32 i64`
//! - floats `f32 f64`
//! - fixed-point `iI.F` / `uI.F` (e.g. `i12.20`, `u0.16`; I+F a multiple of 8)
//! - padding `x[n]` (no value produced)
//! - bytes `b[n]`, trailing bytes `b`
//! - strings `s[n]`, trailing string `s`, NUL-terminated `z`
//! - trailing array `T[]` of any scalar
//! - `r:` — the remaining fields repeat until the payload is exhausted
//!
//! Variable-length constructs (`b`, `s`, `T[]`, `r:`) must come last.

use serde::Serialize;

use crate::error::{Result, SpecError};

/// One field of a parsed pack format.
#[derive(Debug, Clone, PartialEq)]
pub enum PackField {
    UInt { bytes: u8 },
    Int { bytes: u8 },
    Float { bytes: u8 },
    /// Fixed-point fraction stored as an integer of `int_bits + frac_bits` bits.
    Fixed {
        signed: bool,
        int_bits: u8,
        frac_bits: u8,
    },
    /// `b[n]`, or trailing `b` when `len` is `None`.
    Bytes { len: Option<usize> },
    /// `s[n]`, or trailing `s` when `len` is `None`.
    String { len: Option<usize> },
    /// NUL-terminated string.
    ZString,
    /// `x[n]`; produces no value.
    Padding { len: usize },
    /// `T[]`: the scalar repeats until the payload ends.
    ArrayRest(Box<PackField>),
}

impl PackField {
    /// Encoded size in bytes, `None` for variable-length fields.
    fn size(&self) -> Option<usize> {
        match self {
            PackField::UInt { bytes } | PackField::Int { bytes } | PackField::Float { bytes } => {
                Some(*bytes as usize)
            }
            PackField::Fixed {
                int_bits,
                frac_bits,
                ..
            } => Some(((*int_bits as usize) + (*frac_bits as usize)) / 8),
            PackField::Bytes { len } => *len,
            PackField::String { len } => *len,
            PackField::ZString => None,
            PackField::Padding { len } => Some(*len),
            PackField::ArrayRest(_) => None,
        }
    }

    fn produces_value(&self) -> bool {
        !matches!(self, PackField::Padding { .. })
    }

    fn expected_name(&self) -> &'static str {
        match self {
            PackField::UInt { .. } => "unsigned integer",
            PackField::Int { .. } => "signed integer",
            PackField::Float { .. } | PackField::Fixed { .. } => "number",
            PackField::Bytes { .. } => "bytes",
            PackField::String { .. } | PackField::ZString => "string",
            PackField::Padding { .. } => "padding",
            PackField::ArrayRest(_) => "array",
        }
    }
}

/// A decoded (or to-be-encoded) payload value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PackValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<PackValue>),
}

impl PackValue {
    fn as_u64(&self) -> Option<u64> {
        match self {
            PackValue::Unsigned(v) => Some(*v),
            PackValue::Signed(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            PackValue::Signed(v) => Some(*v),
            PackValue::Unsigned(v) if *v <= i64::MAX as u64 => Some(*v as i64),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            PackValue::Float(v) => Some(*v),
            PackValue::Unsigned(v) => Some(*v as f64),
            PackValue::Signed(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// A parsed pack-format string.
#[derive(Debug, Clone, PartialEq)]
pub struct PackFormat {
    head: Vec<PackField>,
    /// Fields after `r:`, repeated until the payload is exhausted.
    repeat: Vec<PackField>,
    source: String,
}

impl PackFormat {
    /// Parse a format string.
    pub fn parse(format: &str) -> Result<Self> {
        let mut head: Vec<PackField> = Vec::new();
        let mut repeat: Vec<PackField> = Vec::new();
        let mut in_repeat = false;

        for token in format.split_whitespace() {
            if token == "r:" {
                if in_repeat {
                    return Err(SpecError::BadToken("r:".into()));
                }
                in_repeat = true;
                continue;
            }
            let field = parse_token(token)?;
            let target = if in_repeat { &mut repeat } else { &mut head };

            // Only the final head field may be variable-length, and nothing
            // fixed may follow it.
            if !in_repeat {
                if let Some(last) = target.last() {
                    if last.size().is_none() {
                        return Err(SpecError::TrailingConflict(format.to_string()));
                    }
                }
            }
            target.push(field);
        }

        if in_repeat {
            if repeat.is_empty() {
                return Err(SpecError::BadToken("r:".into()));
            }
            // The repeat block consumes the rest; head must be fixed-size.
            if head.iter().any(|f| f.size().is_none()) {
                return Err(SpecError::TrailingConflict(format.to_string()));
            }
            if repeat.iter().any(|f| f.size().is_none()) {
                return Err(SpecError::TrailingConflict(format.to_string()));
            }
        }

        Ok(Self {
            head,
            repeat,
            source: format.to_string(),
        })
    }

    /// The original format string.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of values [`decode`](Self::decode) produces /
    /// [`encode`](Self::encode) expects.
    pub fn arity(&self) -> usize {
        let head: usize = self.head.iter().filter(|f| f.produces_value()).count();
        head + usize::from(!self.repeat.is_empty())
    }

    /// Decode a payload into values.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<PackValue>> {
        let mut offset = 0usize;
        let mut values = Vec::with_capacity(self.arity());

        for field in &self.head {
            if let Some(value) = decode_field(field, bytes, &mut offset)? {
                values.push(value);
            }
        }

        if !self.repeat.is_empty() {
            let row_values: usize = self.repeat.iter().filter(|f| f.produces_value()).count();
            let mut rows = Vec::new();
            while offset < bytes.len() {
                let mut row = Vec::with_capacity(row_values);
                for field in &self.repeat {
                    if let Some(value) = decode_field(field, bytes, &mut offset)? {
                        row.push(value);
                    }
                }
                // Single-field repeats flatten to a plain array.
                if row.len() == 1 {
                    rows.push(row.pop().expect("row has one value"));
                } else {
                    rows.push(PackValue::Array(row));
                }
            }
            values.push(PackValue::Array(rows));
        }

        Ok(values)
    }

    /// Encode values into a payload.
    pub fn encode(&self, values: &[PackValue]) -> Result<Vec<u8>> {
        if values.len() != self.arity() {
            return Err(SpecError::Arity {
                expected: self.arity(),
                got: values.len(),
            });
        }

        let mut out = Vec::new();
        let mut next = 0usize;
        for field in &self.head {
            if field.produces_value() {
                encode_field(field, &values[next], next, &mut out)?;
                next += 1;
            } else if let PackField::Padding { len } = field {
                out.extend(std::iter::repeat(0u8).take(*len));
            }
        }

        if !self.repeat.is_empty() {
            let PackValue::Array(rows) = &values[next] else {
                return Err(SpecError::TypeMismatch {
                    index: next,
                    expected: "array",
                });
            };
            let row_fields: Vec<&PackField> = self
                .repeat
                .iter()
                .filter(|f| f.produces_value())
                .collect();
            for row in rows {
                let cells: Vec<&PackValue> = if row_fields.len() == 1 {
                    vec![row]
                } else {
                    let PackValue::Array(cells) = row else {
                        return Err(SpecError::TypeMismatch {
                            index: next,
                            expected: "array of rows",
                        });
                    };
                    if cells.len() != row_fields.len() {
                        return Err(SpecError::Arity {
                            expected: row_fields.len(),
                            got: cells.len(),
                        });
                    }
                    cells.iter().collect()
                };
                let mut cell = 0usize;
                for field in &self.repeat {
                    if field.produces_value() {
                        encode_field(field, cells[cell], next, &mut out)?;
                        cell += 1;
                    } else if let PackField::Padding { len } = field {
                        out.extend(std::iter::repeat(0u8).take(*len));
                    }
                }
            }
        }

        Ok(out)
    }
}

fn parse_token(token: &str) -> Result<PackField> {
    // Bracketed suffix: x[n], b[n], s[n], T[].
    if let Some(open) = token.find('[') {
        let (base, rest) = token.split_at(open);
        let inner = rest
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .ok_or_else(|| SpecError::BadToken(token.to_string()))?;

        if inner.is_empty() {
            let scalar = parse_scalar(base, token)?;
            return Ok(PackField::ArrayRest(Box::new(scalar)));
        }

        let len: usize = inner
            .parse()
            .map_err(|_| SpecError::BadToken(token.to_string()))?;
        return match base {
            "x" => Ok(PackField::Padding { len }),
            "b" => Ok(PackField::Bytes { len: Some(len) }),
            "s" => Ok(PackField::String { len: Some(len) }),
            _ => Err(SpecError::BadToken(token.to_string())),
        };
    }

    match token {
        "b" => Ok(PackField::Bytes { len: None }),
        "s" => Ok(PackField::String { len: None }),
        "z" => Ok(PackField::ZString),
        _ => parse_scalar(token, token),
    }
}

fn parse_scalar(base: &str, token: &str) -> Result<PackField> {
    match base {
        "u8" => return Ok(PackField::UInt { bytes: 1 }),
        "u16" => return Ok(PackField::UInt { bytes: 2 }),
        "u32" => return Ok(PackField::UInt { bytes: 4 }),
        "u64" => return Ok(PackField::UInt { bytes: 8 }),
        "i8" => return Ok(PackField::Int { bytes: 1 }),
        "i16" => return Ok(PackField::Int { bytes: 2 }),
        "i32" => return Ok(PackField::Int { bytes: 4 }),
        "i64" => return Ok(PackField::Int { bytes: 8 }),
        "f32" => return Ok(PackField::Float { bytes: 4 }),
        "f64" => return Ok(PackField::Float { bytes: 8 }),
        _ => {}
    }

    // Fixed point: i12.20, u0.16, u16.16, ...
    let signed = match base.as_bytes().first() {
        Some(b'i') => true,
        Some(b'u') => false,
        _ => return Err(SpecError::BadToken(token.to_string())),
    };
    let (int_part, frac_part) = base[1..]
        .split_once('.')
        .ok_or_else(|| SpecError::BadToken(token.to_string()))?;
    let int_bits: u8 = int_part
        .parse()
        .map_err(|_| SpecError::BadToken(token.to_string()))?;
    let frac_bits: u8 = frac_part
        .parse()
        .map_err(|_| SpecError::BadToken(token.to_string()))?;
    let total = int_bits as usize + frac_bits as usize;
    if total == 0 || total > 64 || total % 8 != 0 {
        return Err(SpecError::BadToken(token.to_string()));
    }
    Ok(PackField::Fixed {
        signed,
        int_bits,
        frac_bits,
    })
}

fn take<'a>(bytes: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let remaining = bytes.len() - *offset;
    if remaining < len {
        return Err(SpecError::Truncated {
            needed: len - remaining,
            had: remaining,
        });
    }
    let slice = &bytes[*offset..*offset + len];
    *offset += len;
    Ok(slice)
}

fn read_uint_le(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for (i, byte) in bytes.iter().enumerate() {
        value |= (*byte as u64) << (8 * i);
    }
    value
}

fn sign_extend(raw: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

fn decode_field(field: &PackField, bytes: &[u8], offset: &mut usize) -> Result<Option<PackValue>> {
    let value = match field {
        PackField::Padding { len } => {
            take(bytes, offset, *len)?;
            return Ok(None);
        }
        PackField::UInt { bytes: n } => {
            PackValue::Unsigned(read_uint_le(take(bytes, offset, *n as usize)?))
        }
        PackField::Int { bytes: n } => {
            let raw = read_uint_le(take(bytes, offset, *n as usize)?);
            PackValue::Signed(sign_extend(raw, *n as u32 * 8))
        }
        PackField::Float { bytes: 4 } => {
            let raw = take(bytes, offset, 4)?;
            PackValue::Float(f32::from_le_bytes(raw.try_into().expect("4 bytes")) as f64)
        }
        PackField::Float { .. } => {
            let raw = take(bytes, offset, 8)?;
            PackValue::Float(f64::from_le_bytes(raw.try_into().expect("8 bytes")))
        }
        PackField::Fixed {
            signed,
            int_bits,
            frac_bits,
        } => {
            let total = (*int_bits as usize + *frac_bits as usize) / 8;
            let raw = read_uint_le(take(bytes, offset, total)?);
            let scale = (1u64 << *frac_bits) as f64;
            if *signed {
                PackValue::Float(sign_extend(raw, total as u32 * 8) as f64 / scale)
            } else {
                PackValue::Float(raw as f64 / scale)
            }
        }
        PackField::Bytes { len } => {
            let len = len.unwrap_or(bytes.len() - *offset);
            PackValue::Bytes(take(bytes, offset, len)?.to_vec())
        }
        PackField::String { len } => {
            let len = len.unwrap_or(bytes.len() - *offset);
            let raw = take(bytes, offset, len)?;
            // Sized strings may be NUL-padded.
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            PackValue::String(String::from_utf8_lossy(&raw[..end]).into_owned())
        }
        PackField::ZString => {
            let rest = &bytes[*offset..];
            let nul = rest.iter().position(|&b| b == 0).ok_or(SpecError::Truncated {
                needed: 1,
                had: rest.len(),
            })?;
            let raw = take(bytes, offset, nul + 1)?;
            PackValue::String(String::from_utf8_lossy(&raw[..nul]).into_owned())
        }
        PackField::ArrayRest(inner) => {
            let mut items = Vec::new();
            while *offset < bytes.len() {
                if let Some(value) = decode_field(inner, bytes, offset)? {
                    items.push(value);
                }
            }
            PackValue::Array(items)
        }
    };
    Ok(Some(value))
}

fn put_uint_le(out: &mut Vec<u8>, value: u64, bytes: usize) {
    out.extend_from_slice(&value.to_le_bytes()[..bytes]);
}

fn encode_field(field: &PackField, value: &PackValue, index: usize, out: &mut Vec<u8>) -> Result<()> {
    match field {
        PackField::Padding { .. } => unreachable!("padding handled by caller"),
        PackField::UInt { bytes } => {
            let v = value.as_u64().ok_or(SpecError::TypeMismatch {
                index,
                expected: field.expected_name(),
            })?;
            if *bytes < 8 && v >= 1u64 << (*bytes as u32 * 8) {
                return Err(SpecError::OutOfRange {
                    index,
                    width: bytes * 8,
                });
            }
            put_uint_le(out, v, *bytes as usize);
        }
        PackField::Int { bytes } => {
            let v = value.as_i64().ok_or(SpecError::TypeMismatch {
                index,
                expected: field.expected_name(),
            })?;
            if *bytes < 8 {
                let bits = *bytes as u32 * 8;
                let min = -(1i64 << (bits - 1));
                let max = (1i64 << (bits - 1)) - 1;
                if v < min || v > max {
                    return Err(SpecError::OutOfRange {
                        index,
                        width: bytes * 8,
                    });
                }
            }
            put_uint_le(out, v as u64, *bytes as usize);
        }
        PackField::Float { bytes: 4 } => {
            let v = value.as_f64().ok_or(SpecError::TypeMismatch {
                index,
                expected: field.expected_name(),
            })?;
            out.extend_from_slice(&(v as f32).to_le_bytes());
        }
        PackField::Float { .. } => {
            let v = value.as_f64().ok_or(SpecError::TypeMismatch {
                index,
                expected: field.expected_name(),
            })?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        PackField::Fixed {
            signed,
            int_bits,
            frac_bits,
        } => {
            let v = value.as_f64().ok_or(SpecError::TypeMismatch {
                index,
                expected: field.expected_name(),
            })?;
            let total_bytes = (*int_bits as usize + *frac_bits as usize) / 8;
            let scaled = (v * (1u64 << *frac_bits) as f64).round();
            let raw = if *signed {
                (scaled as i64) as u64
            } else {
                if scaled < 0.0 {
                    return Err(SpecError::OutOfRange {
                        index,
                        width: (total_bytes * 8) as u8,
                    });
                }
                scaled as u64
            };
            put_uint_le(out, raw, total_bytes);
        }
        PackField::Bytes { len } => {
            let PackValue::Bytes(data) = value else {
                return Err(SpecError::TypeMismatch {
                    index,
                    expected: field.expected_name(),
                });
            };
            match len {
                Some(len) => {
                    if data.len() > *len {
                        return Err(SpecError::TooLong { index, max: *len });
                    }
                    out.extend_from_slice(data);
                    out.extend(std::iter::repeat(0u8).take(len - data.len()));
                }
                None => out.extend_from_slice(data),
            }
        }
        PackField::String { len } => {
            let PackValue::String(text) = value else {
                return Err(SpecError::TypeMismatch {
                    index,
                    expected: field.expected_name(),
                });
            };
            let data = text.as_bytes();
            match len {
                Some(len) => {
                    if data.len() > *len {
                        return Err(SpecError::TooLong { index, max: *len });
                    }
                    out.extend_from_slice(data);
                    out.extend(std::iter::repeat(0u8).take(len - data.len()));
                }
                None => out.extend_from_slice(data),
            }
        }
        PackField::ZString => {
            let PackValue::String(text) = value else {
                return Err(SpecError::TypeMismatch {
                    index,
                    expected: field.expected_name(),
                });
            };
            if text.as_bytes().contains(&0) {
                return Err(SpecError::InteriorNul);
            }
            out.extend_from_slice(text.as_bytes());
            out.push(0);
        }
        PackField::ArrayRest(inner) => {
            let PackValue::Array(items) = value else {
                return Err(SpecError::TypeMismatch {
                    index,
                    expected: field.expected_name(),
                });
            };
            for item in items {
                encode_field(inner, item, index, out)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_roundtrip() {
        let fmt = PackFormat::parse("u8 u16 u32 i8 i16 i32").unwrap();
        let values = vec![
            PackValue::Unsigned(0xAB),
            PackValue::Unsigned(0xBEEF),
            PackValue::Unsigned(0xDEAD_BEEF),
            PackValue::Signed(-5),
            PackValue::Signed(-30_000),
            PackValue::Signed(-2_000_000_000),
        ];
        let bytes = fmt.encode(&values).unwrap();
        assert_eq!(bytes.len(), 1 + 2 + 4 + 1 + 2 + 4);
        assert_eq!(fmt.decode(&bytes).unwrap(), values);
    }

    #[test]
    fn padding_is_skipped() {
        let fmt = PackFormat::parse("u16 x[2] u8").unwrap();
        let bytes = fmt
            .encode(&[PackValue::Unsigned(0x0102), PackValue::Unsigned(9)])
            .unwrap();
        assert_eq!(bytes, vec![0x02, 0x01, 0x00, 0x00, 0x09]);
        assert_eq!(
            fmt.decode(&bytes).unwrap(),
            vec![PackValue::Unsigned(0x0102), PackValue::Unsigned(9)]
        );
    }

    #[test]
    fn announce_format_roundtrip() {
        // ControlCmdPack::ServicesReport
        let fmt = PackFormat::parse("u16 u8 x[1] r: u32").unwrap();
        let values = vec![
            PackValue::Unsigned(0x0501),
            PackValue::Unsigned(3),
            PackValue::Array(vec![
                PackValue::Unsigned(0x1473_a263),
                PackValue::Unsigned(0x1421_bac7),
            ]),
        ];
        let bytes = fmt.encode(&values).unwrap();
        assert_eq!(bytes.len(), 4 + 8);
        assert_eq!(fmt.decode(&bytes).unwrap(), values);
    }

    #[test]
    fn trailing_array_roundtrip() {
        let fmt = PackFormat::parse("u8 u32[]").unwrap();
        let values = vec![
            PackValue::Unsigned(7),
            PackValue::Array(vec![PackValue::Unsigned(1), PackValue::Unsigned(2)]),
        ];
        let bytes = fmt.encode(&values).unwrap();
        assert_eq!(fmt.decode(&bytes).unwrap(), values);
    }

    #[test]
    fn trailing_bytes_roundtrip() {
        // ControlPipePack::WrappedCommand
        let fmt = PackFormat::parse("u8 u8 u16 b").unwrap();
        let values = vec![
            PackValue::Unsigned(8),
            PackValue::Unsigned(2),
            PackValue::Unsigned(0x2001),
            PackValue::Bytes(vec![0xf4, 0x01, 0x00, 0x00]),
        ];
        let bytes = fmt.encode(&values).unwrap();
        assert_eq!(fmt.decode(&bytes).unwrap(), values);
    }

    #[test]
    fn fixed_point_decode() {
        let fmt = PackFormat::parse("u0.16").unwrap();
        let bytes = fmt.encode(&[PackValue::Float(0.5)]).unwrap();
        assert_eq!(bytes, vec![0x00, 0x80]);
        let decoded = fmt.decode(&bytes).unwrap();
        let PackValue::Float(v) = decoded[0] else {
            panic!("expected float")
        };
        assert!((v - 0.5).abs() < 1e-4);
    }

    #[test]
    fn signed_fixed_point_roundtrip() {
        let fmt = PackFormat::parse("i12.20").unwrap();
        let bytes = fmt.encode(&[PackValue::Float(-1.25)]).unwrap();
        assert_eq!(bytes.len(), 4);
        let decoded = fmt.decode(&bytes).unwrap();
        let PackValue::Float(v) = decoded[0] else {
            panic!("expected float")
        };
        assert!((v + 1.25).abs() < 1e-5);
    }

    #[test]
    fn zstring_roundtrip() {
        let fmt = PackFormat::parse("z u8").unwrap();
        let values = vec![
            PackValue::String("net0".into()),
            PackValue::Unsigned(4),
        ];
        let bytes = fmt.encode(&values).unwrap();
        assert_eq!(bytes, b"net0\0\x04");
        assert_eq!(fmt.decode(&bytes).unwrap(), values);
    }

    #[test]
    fn sized_string_is_nul_padded() {
        let fmt = PackFormat::parse("s[8]").unwrap();
        let bytes = fmt.encode(&[PackValue::String("abc".into())]).unwrap();
        assert_eq!(bytes, b"abc\0\0\0\0\0");
        assert_eq!(
            fmt.decode(&bytes).unwrap(),
            vec![PackValue::String("abc".into())]
        );
    }

    #[test]
    fn truncated_payload_reports_missing_bytes() {
        let fmt = PackFormat::parse("u32").unwrap();
        let err = fmt.decode(&[1, 2]).unwrap_err();
        assert!(matches!(err, SpecError::Truncated { needed: 2, had: 2 }));
    }

    #[test]
    fn arity_mismatch() {
        let fmt = PackFormat::parse("u8 u8").unwrap();
        let err = fmt.encode(&[PackValue::Unsigned(1)]).unwrap_err();
        assert!(matches!(err, SpecError::Arity { expected: 2, got: 1 }));
    }

    #[test]
    fn out_of_range_value() {
        let fmt = PackFormat::parse("u8").unwrap();
        let err = fmt.encode(&[PackValue::Unsigned(256)]).unwrap_err();
        assert!(matches!(err, SpecError::OutOfRange { width: 8, .. }));
    }

    #[test]
    fn rejects_unknown_tokens() {
        assert!(PackFormat::parse("q16").is_err());
        assert!(PackFormat::parse("u8 w[2]").is_err());
        assert!(PackFormat::parse("u3.3").is_err());
    }

    #[test]
    fn rejects_fixed_field_after_variable() {
        assert!(PackFormat::parse("b u8").is_err());
        assert!(PackFormat::parse("s u32").is_err());
    }

    #[test]
    fn multi_field_repeat_rows() {
        let fmt = PackFormat::parse("r: u8 u16").unwrap();
        let values = vec![PackValue::Array(vec![
            PackValue::Array(vec![PackValue::Unsigned(1), PackValue::Unsigned(0x0203)]),
            PackValue::Array(vec![PackValue::Unsigned(4), PackValue::Unsigned(0x0506)]),
        ])];
        let bytes = fmt.encode(&values).unwrap();
        assert_eq!(bytes, vec![1, 0x03, 0x02, 4, 0x06, 0x05]);
        assert_eq!(fmt.decode(&bytes).unwrap(), values);
    }

    #[test]
    fn serializes_to_json() {
        let fmt = PackFormat::parse("u16 s[4]").unwrap();
        let decoded = fmt
            .decode(&[0x2c, 0x01, b'o', b'k', 0, 0])
            .unwrap();
        let json = serde_json::to_string(&decoded).unwrap();
        assert_eq!(json, r#"[300,"ok"]"#);
    }
}
