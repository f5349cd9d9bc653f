//! Chunked byte buffer used as the record envelope carrier.
//!
//! A [`Container`] holds an ordered sequence of byte chunks ("compartments")
//! plus a prepend offset into the sequence. Appends extend the tail,
//! prepends fill empty slots at the head, and the sequence is re-centred
//! when the head slots run out. Bytes handed in are not copied;
//! [`Container::compile_data`] materialises a single contiguous chunk on
//! demand.

use std::io::Write;

use crate::error::Error;
use crate::varint;

/// Number of empty head slots reserved for prepends when re-centring.
const PREPEND_SLOTS: usize = 5;

/// Append/prepend-friendly byte buffer built on a sequence of byte chunks.
///
/// Reading methods come in two flavours: `peek*` never consumes, `get*`
/// consumes exactly the bytes returned.
#[derive(Debug, Default, Clone)]
pub struct Container {
    compartments: Vec<Vec<u8>>,
    offset: usize,
}

impl Container {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a container holding `data` as its single compartment.
    #[must_use]
    pub fn with(data: Vec<u8>) -> Self {
        Self {
            compartments: vec![data],
            offset: 0,
        }
    }

    /// Appends `data` as a new tail compartment. The bytes are not copied.
    pub fn append(&mut self, data: Vec<u8>) {
        if !data.is_empty() {
            self.compartments.push(data);
        }
    }

    /// Prepends `data` as a new head compartment. The bytes are not copied.
    pub fn prepend(&mut self, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        if self.offset == 0 {
            self.renew_compartments();
        }
        self.offset -= 1;
        self.compartments[self.offset] = data;
    }

    /// Appends `n` as a varint.
    pub fn append_number(&mut self, n: u64) {
        self.append(varint::pack(n));
    }

    /// Prepends `n` as a varint.
    pub fn prepend_number(&mut self, n: u64) {
        self.prepend(varint::pack(n));
    }

    /// Appends `data` as a varint-length-prefixed block.
    pub fn append_as_block(&mut self, data: Vec<u8>) {
        self.append_number(data.len() as u64);
        self.append(data);
    }

    /// Prepends `data` as a varint-length-prefixed block.
    pub fn prepend_as_block(&mut self, data: Vec<u8>) {
        let len = data.len() as u64;
        self.prepend(data);
        self.prepend_number(len);
    }

    /// Total number of readable bytes.
    #[must_use]
    pub fn length(&self) -> usize {
        self.compartments[self.offset..]
            .iter()
            .map(Vec::len)
            .sum()
    }

    /// Whether the container holds no readable bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Re-centres the compartment sequence, reserving empty head slots.
    fn renew_compartments(&mut self) {
        let tail = self.compartments.split_off(self.offset);
        let mut renewed = Vec::with_capacity(tail.len() + PREPEND_SLOTS);
        renewed.resize(PREPEND_SLOTS, Vec::new());
        renewed.extend(tail);
        self.compartments = renewed;
        self.offset = PREPEND_SLOTS;
    }

    /// Skips leading compartments that have been fully consumed.
    fn skip_empty(&mut self) {
        while self.offset < self.compartments.len()
            && self.compartments[self.offset].is_empty()
        {
            self.offset += 1;
        }
    }

    /// Concatenates all readable bytes into a single compartment and
    /// returns it. Idempotent: calling it twice yields the same bytes.
    pub fn compile_data(&mut self) -> &[u8] {
        if self.compartments.len() - self.offset != 1 {
            let mut all = Vec::with_capacity(self.length());
            for compartment in &self.compartments[self.offset..] {
                all.extend_from_slice(compartment);
            }
            self.compartments = vec![all];
            self.offset = 0;
        }
        &self.compartments[self.offset]
    }

    /// Returns a copy of the next `n` bytes without consuming them.
    ///
    /// # Errors
    ///
    /// `BufferTooSmall` if fewer than `n` bytes are readable.
    pub fn peek(&self, n: usize) -> Result<Vec<u8>, Error> {
        if self.length() < n {
            return Err(Error::BufferTooSmall);
        }
        let mut out = Vec::with_capacity(n);
        for compartment in &self.compartments[self.offset..] {
            let remaining = n - out.len();
            if remaining == 0 {
                break;
            }
            let take = remaining.min(compartment.len());
            out.extend_from_slice(&compartment[..take]);
        }
        Ok(out)
    }

    /// Consumes and returns the next `n` bytes.
    ///
    /// # Errors
    ///
    /// `BufferTooSmall` if fewer than `n` bytes are readable; nothing is
    /// consumed in that case.
    pub fn get(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        if self.length() < n {
            return Err(Error::BufferTooSmall);
        }
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            self.skip_empty();
            let compartment = &mut self.compartments[self.offset];
            let take = (n - out.len()).min(compartment.len());
            if take == compartment.len() {
                out.append(compartment);
            } else {
                out.extend_from_slice(&compartment[..take]);
                compartment.drain(..take);
            }
        }
        self.skip_empty();
        Ok(out)
    }

    /// Consumes and returns up to `n` bytes.
    pub fn get_max(&mut self, n: usize) -> Vec<u8> {
        let take = n.min(self.length());
        // Length was checked, get cannot fail.
        self.get(take).unwrap_or_default()
    }

    /// Consumes and returns all readable bytes.
    pub fn get_all(&mut self) -> Vec<u8> {
        let len = self.length();
        self.get(len).unwrap_or_default()
    }

    /// Consumes bytes into `target`, returning the number of bytes written.
    pub fn write_to_slice(&mut self, target: &mut [u8]) -> usize {
        let data = self.get_max(target.len());
        target[..data.len()].copy_from_slice(&data);
        data.len()
    }

    /// Writes all readable bytes to `writer` without consuming them.
    ///
    /// # Errors
    ///
    /// Propagates writer errors.
    pub fn write_all_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for compartment in &self.compartments[self.offset..] {
            writer.write_all(compartment)?;
        }
        Ok(())
    }

    /// Consumes and returns the next varint-length-prefixed block.
    ///
    /// # Errors
    ///
    /// `BufferTooSmall` if the length prefix or the block itself is
    /// truncated.
    pub fn get_next_block(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.get_next_n64()?;
        self.get(usize::try_from(len).map_err(|_| Error::VarintExceedsWidth)?)
    }

    fn consume_varint(&mut self) -> Result<u64, Error> {
        let head = self.peek(varint::MAX_LEN.min(self.length()))?;
        let (value, n) = varint::unpack(&head)?;
        self.get(n)?;
        Ok(value)
    }

    /// Consumes the next varint, checking it fits in 8 bits.
    pub fn get_next_n8(&mut self) -> Result<u8, Error> {
        let value = self.consume_varint()?;
        u8::try_from(value).map_err(|_| Error::VarintExceedsWidth)
    }

    /// Consumes the next varint, checking it fits in 16 bits.
    pub fn get_next_n16(&mut self) -> Result<u16, Error> {
        let value = self.consume_varint()?;
        u16::try_from(value).map_err(|_| Error::VarintExceedsWidth)
    }

    /// Consumes the next varint, checking it fits in 32 bits.
    pub fn get_next_n32(&mut self) -> Result<u32, Error> {
        let value = self.consume_varint()?;
        u32::try_from(value).map_err(|_| Error::VarintExceedsWidth)
    }

    /// Consumes the next 64-bit varint.
    pub fn get_next_n64(&mut self) -> Result<u64, Error> {
        self.consume_varint()
    }
}
