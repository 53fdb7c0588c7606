//! ICE-Lite server.
//!
//! The server never generates checks; it answers Binding Requests arriving on
//! any transport source, authenticates them against the local credentials and
//! reports each authenticated (source, USE-CANDIDATE) pair upwards. Validity
//! tracking is the transport's job; the server itself is stateless beyond its
//! credentials.

use bytes::BytesMut;
use std::collections::VecDeque;

use log::{debug, warn};
use shared::error::Result;
use shared::{Transmit, TransportSource};
use stun::message::{MessageAuth, MessageClass, MessageMethod, StunMessage};

/// Events the server emits while processing a message.
///
/// Transmits and events are queued in emission order; the success response
/// for a request is always queued before its `ValidPair` event.
#[derive(Debug)]
pub enum IceServerEvent {
    /// An authenticated pair. The source delivered a well-formed, authorized
    /// Binding Request and may carry media.
    ValidPair {
        source: TransportSource,
        has_use_candidate: bool,
    },
}

pub struct IceServer {
    username_fragment: String,
    password: String,
    transmits: VecDeque<Transmit>,
    events: VecDeque<IceServerEvent>,
}

impl IceServer {
    pub fn new(username_fragment: String, password: String) -> Self {
        debug!("[username_fragment:{username_fragment}, password:{password}]");

        Self {
            username_fragment,
            password,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn username_fragment(&self) -> &str {
        &self.username_fragment
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Process a decoded STUN message received from the given source.
    ///
    /// Responses always travel back through the same source that delivered
    /// the request.
    pub fn process_stun_message(
        &mut self,
        msg: &mut StunMessage,
        source: TransportSource,
    ) -> Result<()> {
        // Must be a Binding method.
        if msg.method() != MessageMethod::Binding {
            if msg.class() == MessageClass::Request {
                debug!(
                    "unknown method {:?} in STUN Request => 400",
                    msg.method()
                );
                self.reply_error(msg, source, 400)?;
            } else {
                debug!(
                    "ignoring STUN Indication or Response with unknown method {:?}",
                    msg.method()
                );
            }

            return Ok(());
        }

        // Must use FINGERPRINT (optional for ICE STUN indications).
        if !msg.has_fingerprint() && msg.class() != MessageClass::Indication {
            if msg.class() == MessageClass::Request {
                debug!("STUN Binding Request without FINGERPRINT => 400");
                self.reply_error(msg, source, 400)?;
            } else {
                debug!("ignoring STUN Binding Response without FINGERPRINT");
            }

            return Ok(());
        }

        match msg.class() {
            MessageClass::Request => {
                // USERNAME, MESSAGE-INTEGRITY and PRIORITY are required.
                if !msg.has_message_integrity() || msg.priority() == 0 || msg.username().is_empty()
                {
                    debug!("missing required attributes in STUN Binding Request => 400");
                    return self.reply_error(msg, source, 400);
                }

                // Check authentication.
                match msg.check_authentication(&self.username_fragment, &self.password) {
                    MessageAuth::Ok => {}
                    MessageAuth::Unauthorized => {
                        debug!("wrong authentication in STUN Binding Request => 401");
                        return self.reply_error(msg, source, 401);
                    }
                    MessageAuth::BadRequest => {
                        debug!("cannot check authentication in STUN Binding Request => 400");
                        return self.reply_error(msg, source, 400);
                    }
                }

                // We are ICE-Lite, so the remote peer must be controlling.
                if msg.ice_controlled() != 0 {
                    debug!("peer indicates ICE-CONTROLLED in STUN Binding Request => 487");
                    return self.reply_error(msg, source, 487);
                }

                debug!(
                    "processing STUN Binding Request with Priority {}{}",
                    msg.priority(),
                    if msg.has_use_candidate() {
                        " and UseCandidate"
                    } else {
                        ""
                    }
                );

                // Create a success response with XOR-MAPPED-ADDRESS set to
                // the source's remote address, authenticated with our
                // password.
                let mut response = msg.create_success_response()?;
                response.set_xor_mapped_address(source.remote_addr());
                response.authenticate(&self.password);
                response.serialize()?;

                self.transmits.push_back(Transmit {
                    source,
                    payload: BytesMut::from(response.raw()),
                });

                // Report the valid pair once the response is queued.
                self.events.push_back(IceServerEvent::ValidPair {
                    source,
                    has_use_candidate: msg.has_use_candidate(),
                });
            }
            MessageClass::Indication => {
                debug!("STUN Binding Indication processed");
            }
            MessageClass::SuccessResponse => {
                debug!("STUN Binding Success Response processed");
            }
            MessageClass::ErrorResponse => {
                debug!("STUN Binding Error Response processed");
            }
        }

        Ok(())
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<IceServerEvent> {
        self.events.pop_front()
    }

    fn reply_error(
        &mut self,
        msg: &StunMessage,
        source: TransportSource,
        error_code: u16,
    ) -> Result<()> {
        let mut response = match msg.create_error_response(error_code) {
            Ok(response) => response,
            Err(err) => {
                warn!("cannot build {error_code} response: {err}");
                return Ok(());
            }
        };
        response.serialize()?;

        self.transmits.push_back(Transmit {
            source,
            payload: BytesMut::from(response.raw()),
        });

        Ok(())
    }
}

#[cfg(test)]
mod server_test;
