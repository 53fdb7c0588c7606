//! RFC 4571 framing for RTC traffic over TCP.
//!
//! Every packet on a TCP connection is prefixed with a 2-byte big-endian
//! length:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! -----------------------------------------------------------------
//! |             LENGTH            |  STUN / DTLS / RTP / RTCP ... |
//! -----------------------------------------------------------------
//! ```
//!
//! [`TcpFramer`] reassembles frames out of a fixed-capacity read buffer. The
//! connection driver reads directly into [`TcpFramer::spare_mut`], commits
//! the number of bytes received and drains whole frames with
//! [`TcpFramer::next_frame`]. Zero-length frames (the null packet) are
//! skipped. When the buffer fills while a frame is still incomplete the
//! partial frame is moved to the front of the buffer; if the incomplete
//! frame already starts at the front the frame can never fit and
//! [`Error::ErrBufferFull`] is returned, which closes the connection.

use crate::error::{Error, Result};

/// Length of the framing header (2 bytes for the length prefix).
pub const FRAMING_HEADER_LEN: usize = 2;

/// Maximum packet size that can be framed (u16::MAX bytes).
pub const MAX_FRAMED_PACKET_SIZE: usize = u16::MAX as usize;

/// Default read buffer capacity per connection.
pub const DEFAULT_FRAMER_CAPACITY: usize = 65536;

/// Adds the RFC 4571 framing header to a packet, writing into `out`.
///
/// Returns the total number of bytes written, or `None` if `out` is too
/// small or the packet exceeds the maximum framed size.
pub fn frame_packet_to(buf: &[u8], out: &mut [u8]) -> Option<usize> {
    if buf.len() > MAX_FRAMED_PACKET_SIZE {
        return None;
    }

    let total_len = FRAMING_HEADER_LEN + buf.len();
    if out.len() < total_len {
        return None;
    }

    out[..FRAMING_HEADER_LEN].copy_from_slice(&(buf.len() as u16).to_be_bytes());
    out[FRAMING_HEADER_LEN..total_len].copy_from_slice(buf);

    Some(total_len)
}

/// Stateful reassembler for RFC 4571 framed packets.
#[derive(Debug)]
pub struct TcpFramer {
    buffer: Box<[u8]>,
    frame_start: usize,
    data_len: usize,
}

impl TcpFramer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            frame_start: 0,
            data_len: 0,
        }
    }

    /// The free region of the buffer for the next socket read.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.data_len..]
    }

    /// Record that `n` bytes were read into the spare region.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.data_len + n <= self.buffer.len());
        self.data_len += n;
    }

    /// Extract the next complete, non-empty frame.
    ///
    /// Returns `None` once the remaining bytes do not hold a whole frame.
    pub fn next_frame(&mut self) -> Option<&[u8]> {
        loop {
            let available = self.data_len - self.frame_start;
            if available < FRAMING_HEADER_LEN {
                return None;
            }

            let packet_len = u16::from_be_bytes([
                self.buffer[self.frame_start],
                self.buffer[self.frame_start + 1],
            ]) as usize;
            if available < FRAMING_HEADER_LEN + packet_len {
                return None;
            }

            let payload_start = self.frame_start + FRAMING_HEADER_LEN;
            self.frame_start = payload_start + packet_len;

            // Once everything is consumed the next frame starts at the front.
            if self.frame_start == self.data_len {
                self.frame_start = 0;
                self.data_len = 0;

                if packet_len != 0 {
                    let end = payload_start + packet_len;
                    return Some(&self.buffer[payload_start..end]);
                }
                return None;
            }

            // Ignore the null packet.
            if packet_len == 0 {
                log::debug!("ignoring 0 length received frame");
                continue;
            }

            return Some(&self.buffer[payload_start..self.frame_start]);
        }
    }

    /// Make room for more data after draining frames.
    ///
    /// If the buffer filled up while a frame is still incomplete, the partial
    /// frame is moved to the front. An incomplete frame that already starts
    /// at the front and fills the whole buffer can never complete.
    pub fn ensure_capacity(&mut self) -> Result<()> {
        if self.data_len < self.buffer.len() {
            return Ok(());
        }

        if self.frame_start == 0 {
            return Err(Error::ErrBufferFull);
        }

        log::debug!(
            "moving {} partial frame bytes to the front of the buffer",
            self.data_len - self.frame_start
        );
        self.buffer.copy_within(self.frame_start..self.data_len, 0);
        self.data_len -= self.frame_start;
        self.frame_start = 0;

        Ok(())
    }

    /// Number of buffered bytes not yet consumed by a frame.
    pub fn pending_len(&self) -> usize {
        self.data_len - self.frame_start
    }
}

impl Default for TcpFramer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAMER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(framer: &mut TcpFramer, data: &[u8]) {
        framer.spare_mut()[..data.len()].copy_from_slice(data);
        framer.commit(data.len());
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; payload.len() + FRAMING_HEADER_LEN];
        frame_packet_to(payload, &mut out).unwrap();
        out
    }

    #[test]
    fn test_frame_packet_to() {
        let mut out = [0u8; 16];
        let n = frame_packet_to(b"Hello", &mut out).unwrap();
        assert_eq!(n, 7);
        assert_eq!(&out[..n], &[0, 5, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_frame_packet_to_buffer_too_small() {
        let mut out = [0u8; 3];
        assert!(frame_packet_to(b"Hello", &mut out).is_none());
    }

    #[test]
    fn test_complete_frame() {
        let mut framer = TcpFramer::new(32);
        push(&mut framer, &framed(b"Test"));

        assert_eq!(framer.next_frame(), Some(&b"Test"[..]));
        assert!(framer.next_frame().is_none());
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_partial_frame_needs_more_data() {
        let mut framer = TcpFramer::new(32);
        let data = framed(b"Hello");

        push(&mut framer, &data[..3]);
        assert!(framer.next_frame().is_none());

        push(&mut framer, &data[3..]);
        assert_eq!(framer.next_frame(), Some(&b"Hello"[..]));
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut framer = TcpFramer::new(64);
        let mut data = framed(b"First");
        data.extend_from_slice(&framed(b"Second"));
        data.extend_from_slice(&framed(b"Third"));
        push(&mut framer, &data);

        assert_eq!(framer.next_frame(), Some(&b"First"[..]));
        assert_eq!(framer.next_frame(), Some(&b"Second"[..]));
        assert_eq!(framer.next_frame(), Some(&b"Third"[..]));
        assert!(framer.next_frame().is_none());
    }

    #[test]
    fn test_zero_length_frames_are_skipped() {
        let mut framer = TcpFramer::new(32);
        let mut data = framed(b"");
        data.extend_from_slice(&framed(b"Payload"));
        data.extend_from_slice(&framed(b""));
        push(&mut framer, &data);

        assert_eq!(framer.next_frame(), Some(&b"Payload"[..]));
        assert!(framer.next_frame().is_none());
    }

    #[test]
    fn test_compaction_moves_partial_frame_to_front() {
        // A consumed 6-byte frame followed by a frame of 30 total bytes: the
        // buffer fills with the second frame incomplete at offset 8, so its
        // 24 buffered bytes must move to the front and parsing resumes.
        let mut framer = TcpFramer::new(32);
        let first = framed(&[0xAA; 6]);
        let second = framed(&[0xBB; 28]);

        push(&mut framer, &first);
        push(&mut framer, &second[..24]);
        assert_eq!(framer.next_frame(), Some(&[0xAA; 6][..]));
        assert!(framer.next_frame().is_none());
        assert_eq!(framer.pending_len(), 24);

        framer.ensure_capacity().unwrap();
        push(&mut framer, &second[24..]);
        assert_eq!(framer.next_frame(), Some(&[0xBB; 28][..]));
    }

    #[test]
    fn test_frame_larger_than_buffer_closes_connection() {
        let mut framer = TcpFramer::new(16);
        let data = framed(&[0xCC; 40]);

        push(&mut framer, &data[..16]);
        assert!(framer.next_frame().is_none());
        assert_eq!(framer.ensure_capacity(), Err(Error::ErrBufferFull));
    }
}
