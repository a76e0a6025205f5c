use crate::record::{FeedbackRecord, HEADER_LEN};

/// Accumulates stream bytes and frames them into feedback records
///
/// Bytes may arrive split anywhere; a record is only produced once all
/// `HEADER_LEN + token_length` bytes are buffered.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buf: Vec<u8>,
    pos: usize,
}

impl RecordDecoder {
    /// Creates an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, bytes: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed by a record
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// True when a partial record is buffered
    pub fn has_partial(&self) -> bool {
        self.buffered() > 0
    }

    /// Pops the next complete record, if one is buffered
    pub fn next_record(&mut self) -> Option<FeedbackRecord> {
        let pending = &self.buf[self.pos..];
        if pending.len() < HEADER_LEN {
            return None;
        }

        let token_len = usize::from(u16::from_be_bytes([pending[4], pending[5]]));
        let frame_len = HEADER_LEN + token_len;
        if pending.len() < frame_len {
            return None;
        }

        let timestamp = u32::from_be_bytes([pending[0], pending[1], pending[2], pending[3]]);
        let token = pending[HEADER_LEN..frame_len].to_vec();
        self.pos += frame_len;

        Some(FeedbackRecord::new(timestamp, token))
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    // Reclaim consumed space before growing
    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}
