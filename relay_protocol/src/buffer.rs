use crate::protocol::ProtocolError;

/// Exactly-sized, write-once message buffer.
///
/// The length is fixed at allocation and the write cursor only moves
/// forward. A write that would run past the allocation is a sizing bug in
/// the caller and panics instead of silently truncating.
#[derive(Debug)]
pub struct MessageBuffer {
    bytes: Vec<u8>,
    len: usize,
}

impl MessageBuffer {
    /// Allocate a buffer of exactly `len` bytes
    pub fn with_len(len: usize) -> Result<Self, ProtocolError> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| ProtocolError::BufferAllocation { len })?;

        Ok(Self { bytes, len })
    }

    /// Allocated length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes written so far
    pub fn written(&self) -> usize {
        self.bytes.len()
    }

    /// Bytes still available before the buffer is full
    pub fn remaining(&self) -> usize {
        self.len - self.bytes.len()
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Write the single tag byte
    pub fn put_tag(&mut self, tag: u8) {
        self.put(&[tag]);
    }

    /// Write a signed 32-bit integer, big-endian
    pub fn put_i32(&mut self, value: i32) {
        self.put(&value.to_be_bytes());
    }

    /// Write a 32-bit float as its raw IEEE-754 bits, big-endian
    pub fn put_f32(&mut self, value: f32) {
        self.put(&value.to_bits().to_be_bytes());
    }

    /// Write a signed 16-bit sample, big-endian
    pub fn put_i16(&mut self, value: i16) {
        self.put(&value.to_be_bytes());
    }

    /// Write a contiguous run of samples in the given order
    pub fn put_i16_slice(&mut self, samples: &[i16]) {
        let needed = samples.len() * std::mem::size_of::<i16>();
        self.check_capacity(needed);

        for sample in samples {
            self.bytes.extend_from_slice(&sample.to_be_bytes());
        }
    }

    /// Bytes written so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the buffer, failing if it was not completely written
    pub fn into_bytes(self) -> Result<Vec<u8>, ProtocolError> {
        if !self.is_full() {
            return Err(ProtocolError::Incomplete {
                expected: self.len,
                written: self.bytes.len(),
            });
        }
        Ok(self.bytes)
    }

    fn put(&mut self, data: &[u8]) {
        self.check_capacity(data.len());
        self.bytes.extend_from_slice(data);
    }

    fn check_capacity(&self, needed: usize) {
        assert!(
            needed <= self.remaining(),
            "message buffer overflow: writing {} bytes with {} of {} remaining",
            needed,
            self.remaining(),
            self.len
        );
    }
}
