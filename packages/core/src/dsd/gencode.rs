//! Fixed-layout binary encoding for types with a known, stable size.
//!
//! Serde-driven formats negotiate structure at decode time; [`GenCode`]
//! types instead commit to a fixed byte layout, which keeps the record
//! meta section at a constant size inside the envelope.

use crate::error::Error;
use crate::varint;

use super::Format;

/// A type with a fixed, self-managed binary layout.
pub trait GenCode {
    /// Encoded size in bytes.
    fn gencode_size(&self) -> usize;

    /// Encodes `self` into its fixed layout.
    fn gencode_marshal(&self) -> Vec<u8>;

    /// Decodes from the start of `data`, returning the bytes consumed.
    ///
    /// # Errors
    ///
    /// `BufferTooSmall` if `data` is shorter than the fixed layout.
    fn gencode_unmarshal(&mut self, data: &[u8]) -> Result<usize, Error>;
}

/// Encodes a [`GenCode`] value as a tagged DSD payload.
#[must_use]
pub fn dump_gencode<T: GenCode>(value: &T) -> Vec<u8> {
    let body = value.gencode_marshal();
    let mut out = varint::pack(u64::from(Format::GenCode.tag()));
    out.extend(body);
    out
}

/// Decodes a tagged GenCode DSD payload.
///
/// # Errors
///
/// `IncompatibleFormat` if the tag is not GenCode; decode errors
/// otherwise.
pub fn load_gencode<T: GenCode + Default>(data: &[u8]) -> Result<T, Error> {
    let (tag, n) = varint::unpack(data)?;
    let tag = u8::try_from(tag).map_err(|_| Error::VarintExceedsWidth)?;
    if Format::from_tag(tag)? != Format::GenCode {
        return Err(Error::IncompatibleFormat);
    }
    let mut value = T::default();
    value.gencode_unmarshal(&data[n..])?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Pair {
        a: u64,
        b: u64,
    }

    impl GenCode for Pair {
        fn gencode_size(&self) -> usize {
            16
        }

        fn gencode_marshal(&self) -> Vec<u8> {
            let mut out = Vec::with_capacity(16);
            out.extend_from_slice(&self.a.to_le_bytes());
            out.extend_from_slice(&self.b.to_le_bytes());
            out
        }

        fn gencode_unmarshal(&mut self, data: &[u8]) -> Result<usize, Error> {
            if data.len() < 16 {
                return Err(Error::BufferTooSmall);
            }
            self.a = u64::from_le_bytes(data[0..8].try_into().expect("checked length"));
            self.b = u64::from_le_bytes(data[8..16].try_into().expect("checked length"));
            Ok(16)
        }
    }

    #[test]
    fn tagged_round_trip() {
        let pair = Pair { a: 7, b: u64::MAX };
        let data = dump_gencode(&pair);
        assert_eq!(data[0], Format::GenCode.tag());
        let decoded: Pair = load_gencode(&data).unwrap();
        assert_eq!(decoded, pair);
    }

    #[test]
    fn wrong_tag_is_rejected() {
        let mut data = vec![Format::Json.tag()];
        data.extend([0_u8; 16]);
        assert!(matches!(
            load_gencode::<Pair>(&data),
            Err(Error::IncompatibleFormat)
        ));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let pair = Pair { a: 1, b: 2 };
        let data = dump_gencode(&pair);
        assert!(matches!(
            load_gencode::<Pair>(&data[..8]),
            Err(Error::BufferTooSmall)
        ));
    }
}
