//! In-memory stand-in for the from-network/to-network BIO pair.
//!
//! The DTLS agent never touches a socket: inbound datagrams are appended to
//! the incoming queue before driving the SSL session, and whatever the
//! session wrote is taken out of the outgoing queue afterwards and forwarded
//! to the current sending source as one datagram.

use bytes::{Buf, BytesMut};
use std::io::{Error, ErrorKind, Read, Result, Write};

#[derive(Debug, Default)]
pub(crate) struct NetworkBio {
    incoming: BytesMut,
    outgoing: BytesMut,
}

impl NetworkBio {
    pub(crate) fn feed_incoming(&mut self, data: &[u8]) {
        self.incoming.extend_from_slice(data);
    }

    /// Take everything the session produced since the last call.
    pub(crate) fn take_outgoing(&mut self) -> BytesMut {
        self.outgoing.split()
    }
}

impl Read for NetworkBio {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.incoming.is_empty() {
            // Reported to the session as a retryable read.
            return Err(Error::from(ErrorKind::WouldBlock));
        }

        let n = buf.len().min(self.incoming.len());
        buf[..n].copy_from_slice(&self.incoming[..n]);
        self.incoming.advance(n);
        Ok(n)
    }
}

impl Write for NetworkBio {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.outgoing.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
