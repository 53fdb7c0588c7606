//! STUN message decoding and encoding.
//!
//! The decoder is single pass: it walks the attribute list once, accumulating
//! the attributes the ICE server cares about, and rejects messages with
//! malformed lengths, attributes after FINGERPRINT, non-FINGERPRINT
//! attributes after MESSAGE-INTEGRITY, or trailing bytes. The raw wire image
//! is retained so MESSAGE-INTEGRITY can later be recomputed over it.
//!
//! The encoder serializes attributes in a fixed order: USERNAME, PRIORITY,
//! ICE-CONTROLLING, ICE-CONTROLLED, USE-CANDIDATE, XOR-MAPPED-ADDRESS,
//! ERROR-CODE, MESSAGE-INTEGRITY, FINGERPRINT.

use bytes::BytesMut;
use std::net::SocketAddr;

use crate::attributes::*;
use crate::fingerprint::{fingerprint_value, FINGERPRINT_SIZE};
use crate::integrity::{message_integrity, verify_integrity, MESSAGE_INTEGRITY_SIZE};
use shared::classifier::STUN_MAGIC_COOKIE;
use shared::error::{Error, Result};

/// Magic cookie at bytes [4..8] of every STUN header.
pub const MAGIC_COOKIE: [u8; 4] = STUN_MAGIC_COOKIE;

/// Size of the STUN message header.
pub const HEADER_LEN: usize = 20;

/// Size of the transaction id field.
pub const TRANSACTION_ID_LEN: usize = 12;

/// Maximum length of the USERNAME attribute value.
pub const MAX_USERNAME_LEN: usize = 513;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageClass {
    Request = 0,
    Indication = 1,
    SuccessResponse = 2,
    ErrorResponse = 3,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageMethod {
    Binding,
    /// Methods this codec does not implement, kept numerically so requests
    /// can be answered with an error response.
    Unknown(u16),
}

impl MessageMethod {
    fn from_number(method: u16) -> Self {
        match method {
            0x001 => MessageMethod::Binding,
            other => MessageMethod::Unknown(other),
        }
    }

    fn number(&self) -> u16 {
        match self {
            MessageMethod::Binding => 0x001,
            MessageMethod::Unknown(other) => *other,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct TransactionId(pub [u8; TRANSACTION_ID_LEN]);

/// Result of checking a message against local ICE credentials.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageAuth {
    Ok,
    Unauthorized,
    BadRequest,
}

/// A decoded (or to-be-encoded) STUN message.
#[derive(Debug, Clone, PartialEq)]
pub struct StunMessage {
    class: MessageClass,
    method: MessageMethod,
    transaction_id: TransactionId,
    username: String,
    priority: u32,
    ice_controlling: u64,
    ice_controlled: u64,
    has_use_candidate: bool,
    message_integrity: Option<[u8; MESSAGE_INTEGRITY_SIZE]>,
    message_integrity_pos: usize,
    has_fingerprint: bool,
    xor_mapped_address: Option<SocketAddr>,
    error_code: u16,
    password: Option<String>,
    raw: BytesMut,
}

impl StunMessage {
    pub fn new(class: MessageClass, method: MessageMethod, transaction_id: TransactionId) -> Self {
        Self {
            class,
            method,
            transaction_id,
            username: String::new(),
            priority: 0,
            ice_controlling: 0,
            ice_controlled: 0,
            has_use_candidate: false,
            message_integrity: None,
            message_integrity_pos: 0,
            has_fingerprint: false,
            xor_mapped_address: None,
            error_code: 0,
            password: None,
            raw: BytesMut::new(),
        }
    }

    /// Whether the given packet looks like a STUN message.
    pub fn is_stun(data: &[u8]) -> bool {
        data.len() >= HEADER_LEN && data[0] < 20 && data[4..8] == MAGIC_COOKIE
    }

    /// Decode a STUN message out of a raw packet.
    pub fn parse(data: &[u8]) -> Result<StunMessage> {
        if !StunMessage::is_stun(data) {
            return Err(Error::ErrNotStunPacket);
        }

        /*
            The message type field is decomposed further into the following
            structure:

                0                 1
                2  3  4 5 6 7 8 9 0 1 2 3 4 5
               +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
               |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
               |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
               +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
        */
        let msg_type = u16::from_be_bytes([data[0], data[1]]);
        let msg_length = u16::from_be_bytes([data[2], data[3]]) as usize;

        // The length field is the total size minus the 20 byte header and
        // must be a multiple of 4 bytes.
        if msg_length != data.len() - HEADER_LEN || msg_length & 0x03 != 0 {
            return Err(Error::ErrStunLengthMismatch);
        }

        let method_number = (msg_type & 0x000F) | ((msg_type & 0x00E0) >> 1) | ((msg_type & 0x3E00) >> 2);
        let class_number = ((data[0] & 0x01) << 1) | ((data[1] & 0x10) >> 4);
        let class = match class_number {
            0 => MessageClass::Request,
            1 => MessageClass::Indication,
            2 => MessageClass::SuccessResponse,
            _ => MessageClass::ErrorResponse,
        };

        let mut transaction_id = TransactionId::default();
        transaction_id.0.copy_from_slice(&data[8..20]);

        let mut msg = StunMessage::new(class, MessageMethod::from_number(method_number), transaction_id);

        let mut has_message_integrity = false;
        let mut has_fingerprint = false;
        let mut fingerprint_attr_pos = 0;
        let mut fingerprint = 0u32;

        // Walk attributes; each holds at least a 4 byte type/length prefix.
        let mut pos = HEADER_LEN;
        while pos + 4 <= data.len() {
            let attr_type = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let attr_length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;

            if pos + 4 + attr_length > data.len() {
                return Err(Error::ErrStunBadAttributeLength);
            }

            // FINGERPRINT must be the last attribute.
            if has_fingerprint {
                return Err(Error::ErrStunAttributeAfterFingerprint);
            }

            // After MESSAGE-INTEGRITY just FINGERPRINT is allowed.
            if has_message_integrity && attr_type != ATTR_FINGERPRINT {
                return Err(Error::ErrStunAttributeAfterIntegrity);
            }

            let value = &data[pos + 4..pos + 4 + attr_length];

            match attr_type {
                ATTR_USERNAME => {
                    if attr_length > MAX_USERNAME_LEN {
                        return Err(Error::ErrStunUsernameTooLong);
                    }
                    msg.username = String::from_utf8_lossy(value).into_owned();
                }
                ATTR_PRIORITY => {
                    let value: [u8; 4] = value
                        .try_into()
                        .map_err(|_| Error::ErrStunBadAttributeLength)?;
                    msg.priority = u32::from_be_bytes(value);
                }
                ATTR_ICE_CONTROLLING => {
                    let value: [u8; 8] = value
                        .try_into()
                        .map_err(|_| Error::ErrStunBadAttributeLength)?;
                    msg.ice_controlling = u64::from_be_bytes(value);
                }
                ATTR_ICE_CONTROLLED => {
                    let value: [u8; 8] = value
                        .try_into()
                        .map_err(|_| Error::ErrStunBadAttributeLength)?;
                    msg.ice_controlled = u64::from_be_bytes(value);
                }
                ATTR_USE_CANDIDATE => {
                    msg.has_use_candidate = true;
                }
                ATTR_MESSAGE_INTEGRITY => {
                    has_message_integrity = true;
                    msg.message_integrity = Some(
                        value
                            .try_into()
                            .map_err(|_| Error::ErrStunBadAttributeLength)?,
                    );
                    msg.message_integrity_pos = pos + 4;
                }
                ATTR_FINGERPRINT => {
                    let value: [u8; FINGERPRINT_SIZE] = value
                        .try_into()
                        .map_err(|_| Error::ErrStunBadAttributeLength)?;
                    has_fingerprint = true;
                    fingerprint_attr_pos = pos;
                    fingerprint = u32::from_be_bytes(value);
                    msg.has_fingerprint = true;
                }
                ATTR_XOR_MAPPED_ADDRESS => {
                    msg.xor_mapped_address = decode_xor_mapped_address(value, &transaction_id)?;
                }
                ATTR_ERROR_CODE => {
                    if attr_length < 4 {
                        return Err(Error::ErrStunBadAttributeLength);
                    }
                    let error_class = (value[2] & 0x07) as u16;
                    let error_number = value[3] as u16;
                    msg.error_code = error_class * 100 + error_number;
                }
                _ => {}
            }

            pos = pad_to_4(pos + 4 + attr_length);
        }

        // The last attribute must end exactly at the total length.
        if pos != data.len() {
            return Err(Error::ErrStunLengthMismatch);
        }

        // If FINGERPRINT is present, verify it against the CRC-32 of the
        // message up to (but excluding) the FINGERPRINT attribute.
        if has_fingerprint && fingerprint != fingerprint_value(&data[..fingerprint_attr_pos]) {
            return Err(Error::ErrStunFingerprintMismatch);
        }

        msg.raw = BytesMut::from(data);

        Ok(msg)
    }

    /// Check USERNAME and MESSAGE-INTEGRITY against our local credentials.
    pub fn check_authentication(
        &mut self,
        local_username: &str,
        local_password: &str,
    ) -> MessageAuth {
        match self.class {
            MessageClass::Request | MessageClass::Indication => {
                // Both USERNAME and MESSAGE-INTEGRITY must be present.
                if self.message_integrity.is_none() || self.username.is_empty() {
                    return MessageAuth::BadRequest;
                }

                // USERNAME must begin with our local username plus ":".
                let local_username_len = local_username.len();
                let username = self.username.as_bytes();
                if username.len() <= local_username_len
                    || username[local_username_len] != b':'
                    || &username[..local_username_len] != local_username.as_bytes()
                {
                    return MessageAuth::Unauthorized;
                }
            }
            // We are ICE-Lite and never generate requests, so there is no
            // short-term credential to check responses against.
            MessageClass::SuccessResponse | MessageClass::ErrorResponse => {
                log::error!("cannot check authentication for a STUN response");
                return MessageAuth::BadRequest;
            }
        }

        let Some(received_tag) = self.message_integrity else {
            return MessageAuth::BadRequest;
        };
        let mi_value_pos = self.message_integrity_pos;

        // If FINGERPRINT is present it must be excluded from the
        // MESSAGE-INTEGRITY calculation, so the header length field is
        // rewritten for the duration of the HMAC and restored afterwards.
        if self.has_fingerprint {
            let trimmed = (self.raw.len() - HEADER_LEN - (4 + FINGERPRINT_SIZE)) as u16;
            self.raw[2..4].copy_from_slice(&trimmed.to_be_bytes());
        }

        let valid = verify_integrity(
            local_password.as_bytes(),
            &self.raw[..mi_value_pos - 4],
            &received_tag,
        );

        if self.has_fingerprint {
            let restored = (self.raw.len() - HEADER_LEN) as u16;
            self.raw[2..4].copy_from_slice(&restored.to_be_bytes());
        }

        if valid {
            MessageAuth::Ok
        } else {
            MessageAuth::Unauthorized
        }
    }

    /// Create a success response for this request, sharing its transaction id.
    pub fn create_success_response(&self) -> Result<StunMessage> {
        if self.class != MessageClass::Request {
            return Err(Error::ErrStunInvalidResponseClass);
        }

        Ok(StunMessage::new(
            MessageClass::SuccessResponse,
            self.method,
            self.transaction_id,
        ))
    }

    /// Create an error response for this request, sharing its transaction id.
    pub fn create_error_response(&self, error_code: u16) -> Result<StunMessage> {
        if self.class != MessageClass::Request {
            return Err(Error::ErrStunInvalidResponseClass);
        }

        let mut response = StunMessage::new(
            MessageClass::ErrorResponse,
            self.method,
            self.transaction_id,
        );
        response.error_code = error_code;

        Ok(response)
    }

    /// Store the password MESSAGE-INTEGRITY will be computed with.
    pub fn authenticate(&mut self, password: &str) {
        // Just for Request, Indication and SuccessResponse messages.
        if self.class == MessageClass::ErrorResponse {
            log::error!("cannot set password for ErrorResponse messages");
            return;
        }

        self.password = Some(password.to_string());
    }

    /// Serialize the message into its raw wire image.
    pub fn serialize(&mut self) -> Result<()> {
        let username_padded_len = pad_to_4(self.username.len());
        let add_xor_mapped_address = self.xor_mapped_address.is_some()
            && self.method == MessageMethod::Binding
            && self.class == MessageClass::SuccessResponse;
        let add_error_code = self.error_code != 0 && self.class == MessageClass::ErrorResponse;
        let add_message_integrity =
            self.class != MessageClass::ErrorResponse && self.password.is_some();

        // First calculate the total required size for the entire message.
        let mut length = HEADER_LEN;

        if !self.username.is_empty() {
            length += 4 + username_padded_len;
        }
        if self.priority != 0 {
            length += 4 + 4;
        }
        if self.ice_controlling != 0 {
            length += 4 + 8;
        }
        if self.ice_controlled != 0 {
            length += 4 + 8;
        }
        if self.has_use_candidate {
            length += 4;
        }
        if add_xor_mapped_address {
            match self.xor_mapped_address {
                Some(SocketAddr::V4(_)) => length += 4 + 8,
                Some(SocketAddr::V6(_)) => length += 4 + 20,
                None => {}
            }
        }
        if add_error_code {
            length += 4 + 4;
        }
        if add_message_integrity {
            length += 4 + MESSAGE_INTEGRITY_SIZE;
        }
        // FINGERPRINT is always appended.
        length += 4 + FINGERPRINT_SIZE;

        let mut raw = BytesMut::zeroed(length);

        // Merge class and method fields into the type field.
        let method = self.method.number();
        let class = self.class as u16;
        let type_field = ((method & 0x0F80) << 2)
            | ((method & 0x0070) << 1)
            | (method & 0x000F)
            | ((class & 0x02) << 7)
            | ((class & 0x01) << 4);

        raw[0..2].copy_from_slice(&type_field.to_be_bytes());
        raw[2..4].copy_from_slice(&((length - HEADER_LEN) as u16).to_be_bytes());
        raw[4..8].copy_from_slice(&MAGIC_COOKIE);
        raw[8..20].copy_from_slice(&self.transaction_id.0);

        let mut pos = HEADER_LEN;

        let put_attr_header = |raw: &mut BytesMut, pos: usize, attr: u16, len: usize| {
            raw[pos..pos + 2].copy_from_slice(&attr.to_be_bytes());
            raw[pos + 2..pos + 4].copy_from_slice(&(len as u16).to_be_bytes());
        };

        if !self.username.is_empty() {
            put_attr_header(&mut raw, pos, ATTR_USERNAME, self.username.len());
            raw[pos + 4..pos + 4 + self.username.len()].copy_from_slice(self.username.as_bytes());
            pos += 4 + username_padded_len;
        }

        if self.priority != 0 {
            put_attr_header(&mut raw, pos, ATTR_PRIORITY, 4);
            raw[pos + 4..pos + 8].copy_from_slice(&self.priority.to_be_bytes());
            pos += 4 + 4;
        }

        if self.ice_controlling != 0 {
            put_attr_header(&mut raw, pos, ATTR_ICE_CONTROLLING, 8);
            raw[pos + 4..pos + 12].copy_from_slice(&self.ice_controlling.to_be_bytes());
            pos += 4 + 8;
        }

        if self.ice_controlled != 0 {
            put_attr_header(&mut raw, pos, ATTR_ICE_CONTROLLED, 8);
            raw[pos + 4..pos + 12].copy_from_slice(&self.ice_controlled.to_be_bytes());
            pos += 4 + 8;
        }

        if self.has_use_candidate {
            put_attr_header(&mut raw, pos, ATTR_USE_CANDIDATE, 0);
            pos += 4;
        }

        if add_xor_mapped_address {
            match self.xor_mapped_address {
                Some(SocketAddr::V4(addr)) => {
                    put_attr_header(&mut raw, pos, ATTR_XOR_MAPPED_ADDRESS, 8);
                    let value = &mut raw[pos + 4..pos + 12];
                    value[0] = 0;
                    value[1] = 0x01;
                    value[2..4].copy_from_slice(&addr.port().to_be_bytes());
                    value[2] ^= MAGIC_COOKIE[0];
                    value[3] ^= MAGIC_COOKIE[1];
                    value[4..8].copy_from_slice(&addr.ip().octets());
                    for i in 0..4 {
                        value[4 + i] ^= MAGIC_COOKIE[i];
                    }
                    pos += 4 + 8;
                }
                Some(SocketAddr::V6(addr)) => {
                    put_attr_header(&mut raw, pos, ATTR_XOR_MAPPED_ADDRESS, 20);
                    let transaction_id = self.transaction_id.0;
                    let value = &mut raw[pos + 4..pos + 24];
                    value[0] = 0;
                    value[1] = 0x02;
                    value[2..4].copy_from_slice(&addr.port().to_be_bytes());
                    value[2] ^= MAGIC_COOKIE[0];
                    value[3] ^= MAGIC_COOKIE[1];
                    value[4..20].copy_from_slice(&addr.ip().octets());
                    for i in 0..4 {
                        value[4 + i] ^= MAGIC_COOKIE[i];
                    }
                    for i in 0..12 {
                        value[8 + i] ^= transaction_id[i];
                    }
                    pos += 4 + 20;
                }
                None => {}
            }
        }

        if add_error_code {
            put_attr_header(&mut raw, pos, ATTR_ERROR_CODE, 4);
            let code_class = (self.error_code / 100) as u8;
            let code_number = (self.error_code % 100) as u8;
            raw[pos + 4] = 0;
            raw[pos + 5] = 0;
            raw[pos + 6] = code_class;
            raw[pos + 7] = code_number;
            pos += 4 + 4;
        }

        if add_message_integrity {
            // Exclude the trailing FINGERPRINT from the HMAC input.
            let trimmed = (length - HEADER_LEN - (4 + FINGERPRINT_SIZE)) as u16;
            raw[2..4].copy_from_slice(&trimmed.to_be_bytes());

            let tag = {
                let password = self.password.as_deref().unwrap_or_default();
                message_integrity(password.as_bytes(), &raw[..pos])
            };

            put_attr_header(&mut raw, pos, ATTR_MESSAGE_INTEGRITY, MESSAGE_INTEGRITY_SIZE);
            raw[pos + 4..pos + 4 + MESSAGE_INTEGRITY_SIZE].copy_from_slice(&tag);
            self.message_integrity = Some(tag);
            self.message_integrity_pos = pos + 4;
            pos += 4 + MESSAGE_INTEGRITY_SIZE;

            // Restore the length field.
            raw[2..4].copy_from_slice(&((length - HEADER_LEN) as u16).to_be_bytes());
        } else {
            self.message_integrity = None;
            self.message_integrity_pos = 0;
        }

        let fingerprint = fingerprint_value(&raw[..pos]);
        put_attr_header(&mut raw, pos, ATTR_FINGERPRINT, FINGERPRINT_SIZE);
        raw[pos + 4..pos + 8].copy_from_slice(&fingerprint.to_be_bytes());
        pos += 4 + FINGERPRINT_SIZE;
        self.has_fingerprint = true;

        debug_assert_eq!(pos, length);
        self.raw = raw;

        Ok(())
    }

    /// Re-check the structural invariants of the wire image.
    pub fn validate(&self) -> Result<()> {
        if self.raw.is_empty() {
            return Err(Error::ErrNotStunPacket);
        }
        StunMessage::parse(&self.raw).map(|_| ())
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn class(&self) -> MessageClass {
        self.class
    }

    pub fn method(&self) -> MessageMethod {
        self.method
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn set_username(&mut self, username: &str) {
        self.username = username.to_string();
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    pub fn ice_controlling(&self) -> u64 {
        self.ice_controlling
    }

    pub fn set_ice_controlling(&mut self, ice_controlling: u64) {
        self.ice_controlling = ice_controlling;
    }

    pub fn ice_controlled(&self) -> u64 {
        self.ice_controlled
    }

    pub fn set_ice_controlled(&mut self, ice_controlled: u64) {
        self.ice_controlled = ice_controlled;
    }

    pub fn has_use_candidate(&self) -> bool {
        self.has_use_candidate
    }

    pub fn set_use_candidate(&mut self) {
        self.has_use_candidate = true;
    }

    pub fn has_message_integrity(&self) -> bool {
        self.message_integrity.is_some()
    }

    pub fn has_fingerprint(&self) -> bool {
        self.has_fingerprint
    }

    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        self.xor_mapped_address
    }

    pub fn set_xor_mapped_address(&mut self, addr: SocketAddr) {
        self.xor_mapped_address = Some(addr);
    }

    pub fn error_code(&self) -> u16 {
        self.error_code
    }
}

fn decode_xor_mapped_address(
    value: &[u8],
    transaction_id: &TransactionId,
) -> Result<Option<SocketAddr>> {
    if value.len() < 4 {
        return Err(Error::ErrStunBadAttributeLength);
    }

    let port = u16::from_be_bytes([value[2] ^ MAGIC_COOKIE[0], value[3] ^ MAGIC_COOKIE[1]]);

    match value[1] {
        0x01 => {
            if value.len() != 8 {
                return Err(Error::ErrStunBadAttributeLength);
            }
            let mut octets = [0u8; 4];
            for i in 0..4 {
                octets[i] = value[4 + i] ^ MAGIC_COOKIE[i];
            }
            Ok(Some(SocketAddr::from((octets, port))))
        }
        0x02 => {
            if value.len() != 20 {
                return Err(Error::ErrStunBadAttributeLength);
            }
            let mut octets = [0u8; 16];
            for i in 0..4 {
                octets[i] = value[4 + i] ^ MAGIC_COOKIE[i];
            }
            for i in 0..12 {
                octets[4 + i] = value[8 + i] ^ transaction_id.0[i];
            }
            Ok(Some(SocketAddr::from((octets, port))))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod message_test;
