use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};
use rand::RngCore;
use crate::error::StunError;

/// STUN magic cookie as defined in RFC 8489
pub const MAGIC_COOKIE: u32 = 0x2112A442;

/// STUN header size (20 bytes)
pub const HEADER_SIZE: usize = 20;

/// Attribute type + length
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;

/// IANA-assigned STUN port
pub const DEFAULT_PORT: u16 = 3478;

const FINGERPRINT_XOR: u32 = 0x5354554E;
const FINGERPRINT_SIZE: usize = ATTRIBUTE_HEADER_SIZE + 4;

const FAMILY_IPV4: u8 = 0x01;
const FAMILY_IPV6: u8 = 0x02;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Cheap pre-check used to drop non-STUN traffic before a full decode.
pub fn is_stun_message(buf: &[u8]) -> bool {
    buf.len() >= HEADER_SIZE && buf[4..8] == MAGIC_COOKIE.to_be_bytes()
}

/// STUN method (12 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Method(pub u16);

impl Method {
    pub const BINDING: Method = Method(0x001);
    pub const ALLOCATE: Method = Method(0x003);
    pub const REFRESH: Method = Method(0x004);
    pub const SEND: Method = Method(0x006);
    pub const DATA: Method = Method(0x007);
    pub const CREATE_PERMISSION: Method = Method(0x008);
    pub const CHANNEL_BIND: Method = Method(0x009);
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BINDING => write!(f, "Binding"),
            Self::ALLOCATE => write!(f, "Allocate"),
            Self::REFRESH => write!(f, "Refresh"),
            Self::SEND => write!(f, "Send"),
            Self::DATA => write!(f, "Data"),
            Self::CREATE_PERMISSION => write!(f, "CreatePermission"),
            Self::CHANNEL_BIND => write!(f, "ChannelBind"),
            Method(other) => write!(f, "0x{:03X}", other),
        }
    }
}

/// STUN message class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Request,
    Indication,
    SuccessResponse,
    ErrorResponse,
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "request",
            Self::Indication => "indication",
            Self::SuccessResponse => "success response",
            Self::ErrorResponse => "error response",
        })
    }
}

/// STUN message type: method and class interleaved in 14 bits (RFC 8489 Section 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType {
    pub method: Method,
    pub class: MessageClass,
}

impl MessageType {
    pub const BINDING_REQUEST: MessageType = MessageType {
        method: Method::BINDING,
        class: MessageClass::Request,
    };

    pub const BINDING_SUCCESS: MessageType = MessageType {
        method: Method::BINDING,
        class: MessageClass::SuccessResponse,
    };

    pub fn new(method: Method, class: MessageClass) -> Self {
        Self { method, class }
    }

    /// Encode into the on-wire 16-bit value
    pub fn value(&self) -> u16 {
        let method = self.method.0 & 0x0FFF;
        let m0 = method & 0x000F;
        let m1 = (method & 0x0070) << 1;
        let m2 = (method & 0x0F80) << 2;

        let class_bits = match self.class {
            MessageClass::Request => 0x0000,
            MessageClass::Indication => 0x0010,
            MessageClass::SuccessResponse => 0x0100,
            MessageClass::ErrorResponse => 0x0110,
        };

        m0 | m1 | m2 | class_bits
    }

    /// Decode from the on-wire 16-bit value (the two leading bits are ignored)
    pub fn from_value(value: u16) -> Self {
        let class = match value & 0x0110 {
            0x0000 => MessageClass::Request,
            0x0010 => MessageClass::Indication,
            0x0100 => MessageClass::SuccessResponse,
            _ => MessageClass::ErrorResponse,
        };

        let method = (value & 0x000F) | ((value & 0x00E0) >> 1) | ((value & 0x3E00) >> 2);

        Self { method: Method(method), class }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.class)
    }
}

/// STUN attribute types (RFC 8489 Section 18.3, RFC 8445 Section 16.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    // Comprehension-required (0x0000-0x7FFF)
    MappedAddress,
    Username,
    MessageIntegrity,
    ErrorCode,
    UnknownAttributes,
    Realm,
    Nonce,
    MessageIntegritySha256,
    PasswordAlgorithm,
    UserHash,
    XorMappedAddress,
    Priority,
    UseCandidate,

    // Comprehension-optional (0x8000-0xFFFF)
    PasswordAlgorithms,
    AlternateDomain,
    Software,
    AlternateServer,
    Fingerprint,
    IceControlled,
    IceControlling,
    ResponseOrigin,
    OtherAddress,

    /// Anything else; carried through untouched
    Unknown(u16),
}

impl AttributeType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0001 => Self::MappedAddress,
            0x0006 => Self::Username,
            0x0008 => Self::MessageIntegrity,
            0x0009 => Self::ErrorCode,
            0x000A => Self::UnknownAttributes,
            0x0014 => Self::Realm,
            0x0015 => Self::Nonce,
            0x001C => Self::MessageIntegritySha256,
            0x001D => Self::PasswordAlgorithm,
            0x001E => Self::UserHash,
            0x0020 => Self::XorMappedAddress,
            0x0024 => Self::Priority,
            0x0025 => Self::UseCandidate,
            0x8002 => Self::PasswordAlgorithms,
            0x8003 => Self::AlternateDomain,
            0x8022 => Self::Software,
            0x8023 => Self::AlternateServer,
            0x8028 => Self::Fingerprint,
            0x8029 => Self::IceControlled,
            0x802A => Self::IceControlling,
            0x802B => Self::ResponseOrigin,
            0x802C => Self::OtherAddress,
            other => Self::Unknown(other),
        }
    }

    pub fn value(&self) -> u16 {
        match self {
            Self::MappedAddress => 0x0001,
            Self::Username => 0x0006,
            Self::MessageIntegrity => 0x0008,
            Self::ErrorCode => 0x0009,
            Self::UnknownAttributes => 0x000A,
            Self::Realm => 0x0014,
            Self::Nonce => 0x0015,
            Self::MessageIntegritySha256 => 0x001C,
            Self::PasswordAlgorithm => 0x001D,
            Self::UserHash => 0x001E,
            Self::XorMappedAddress => 0x0020,
            Self::Priority => 0x0024,
            Self::UseCandidate => 0x0025,
            Self::PasswordAlgorithms => 0x8002,
            Self::AlternateDomain => 0x8003,
            Self::Software => 0x8022,
            Self::AlternateServer => 0x8023,
            Self::Fingerprint => 0x8028,
            Self::IceControlled => 0x8029,
            Self::IceControlling => 0x802A,
            Self::ResponseOrigin => 0x802B,
            Self::OtherAddress => 0x802C,
            Self::Unknown(other) => *other,
        }
    }

    /// Check if attribute is comprehension-required
    pub fn is_comprehension_required(&self) -> bool {
        self.value() < 0x8000
    }

    fn name(&self) -> Option<&'static str> {
        Some(match self {
            Self::MappedAddress => "MAPPED-ADDRESS",
            Self::Username => "USERNAME",
            Self::MessageIntegrity => "MESSAGE-INTEGRITY",
            Self::ErrorCode => "ERROR-CODE",
            Self::UnknownAttributes => "UNKNOWN-ATTRIBUTES",
            Self::Realm => "REALM",
            Self::Nonce => "NONCE",
            Self::MessageIntegritySha256 => "MESSAGE-INTEGRITY-SHA256",
            Self::PasswordAlgorithm => "PASSWORD-ALGORITHM",
            Self::UserHash => "USERHASH",
            Self::XorMappedAddress => "XOR-MAPPED-ADDRESS",
            Self::Priority => "PRIORITY",
            Self::UseCandidate => "USE-CANDIDATE",
            Self::PasswordAlgorithms => "PASSWORD-ALGORITHMS",
            Self::AlternateDomain => "ALTERNATE-DOMAIN",
            Self::Software => "SOFTWARE",
            Self::AlternateServer => "ALTERNATE-SERVER",
            Self::Fingerprint => "FINGERPRINT",
            Self::IceControlled => "ICE-CONTROLLED",
            Self::IceControlling => "ICE-CONTROLLING",
            Self::ResponseOrigin => "RESPONSE-ORIGIN",
            Self::OtherAddress => "OTHER-ADDRESS",
            Self::Unknown(_) => return None,
        })
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:04X}", self.value()),
        }
    }
}

/// STUN transaction ID (96 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    /// Generate new random transaction ID with cryptographically secure RNG
    pub fn new() -> Self {
        let mut id = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut id);
        Self(id)
    }

    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

/// One TLV attribute exactly as it appeared on the wire
///
/// Padding is zero for attributes built locally; decoded attributes keep the
/// bytes the sender put there so the message re-encodes unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: AttributeType,
    pub value: Vec<u8>,
    padding: [u8; 3],
}

impl Attribute {
    /// Create new attribute
    pub fn new(attr_type: AttributeType, value: impl Into<Vec<u8>>) -> Self {
        Self {
            attr_type,
            value: value.into(),
            padding: [0; 3],
        }
    }

    /// SOFTWARE attribute
    pub fn software(description: &str) -> Self {
        Self::new(AttributeType::Software, description.as_bytes())
    }

    /// XOR-MAPPED-ADDRESS attribute for `addr`, obfuscated with `tid`
    pub fn xor_mapped_address(addr: SocketAddr, tid: &TransactionId) -> Self {
        let mut value = Vec::with_capacity(20);
        encode_address(&mut value, &addr, Some(tid));
        Self::new(AttributeType::XorMappedAddress, value)
    }

    /// Declared length of the value
    pub fn length(&self) -> u16 {
        self.value.len() as u16
    }

    /// Padding bytes written after the value
    pub fn padding(&self) -> &[u8] {
        &self.padding[..padded_len(self.value.len()) - self.value.len()]
    }

    /// Interpret the raw value according to the attribute type
    pub fn decode_value(&self, tid: &TransactionId) -> Result<AttributeValue, StunError> {
        let raw = self.value.as_slice();
        let type_code = self.attr_type.value();

        let value = match self.attr_type {
            AttributeType::MappedAddress => AttributeValue::MappedAddress(decode_address(raw, None)?),
            AttributeType::XorMappedAddress => {
                AttributeValue::XorMappedAddress(decode_address(raw, Some(tid))?)
            }
            AttributeType::AlternateServer => {
                AttributeValue::AlternateServer(decode_address(raw, None)?)
            }
            AttributeType::ResponseOrigin => AttributeValue::ResponseOrigin(decode_address(raw, None)?),
            AttributeType::OtherAddress => AttributeValue::OtherAddress(decode_address(raw, None)?),
            AttributeType::Username => AttributeValue::Username(utf8(type_code, raw)?),
            AttributeType::Realm => AttributeValue::Realm(utf8(type_code, raw)?),
            AttributeType::Software => AttributeValue::Software(utf8(type_code, raw)?),
            AttributeType::AlternateDomain => AttributeValue::AlternateDomain(utf8(type_code, raw)?),
            AttributeType::Nonce => AttributeValue::Nonce(raw.to_vec()),
            AttributeType::ErrorCode => {
                if raw.len() < 4 {
                    return Err(StunError::AttributeParseError {
                        attr_type: type_code,
                        reason: "ERROR-CODE too short".to_string(),
                    });
                }
                let class = (raw[2] & 0x07) as u16;
                let number = raw[3] as u16;
                let reason = String::from_utf8_lossy(&raw[4..]).into_owned();
                AttributeValue::ErrorCode {
                    code: class * 100 + number,
                    reason,
                }
            }
            AttributeType::UnknownAttributes => {
                let mut buf = raw;
                let mut attrs = Vec::with_capacity(raw.len() / 2);
                while buf.remaining() >= 2 {
                    attrs.push(buf.get_u16());
                }
                AttributeValue::UnknownAttributes(attrs)
            }
            AttributeType::MessageIntegrity => AttributeValue::MessageIntegrity(raw.to_vec()),
            AttributeType::MessageIntegritySha256 => {
                AttributeValue::MessageIntegritySha256(raw.to_vec())
            }
            AttributeType::Fingerprint => AttributeValue::Fingerprint(fixed_u32(type_code, raw)?),
            AttributeType::Priority => AttributeValue::Priority(fixed_u32(type_code, raw)?),
            AttributeType::UseCandidate => AttributeValue::UseCandidate,
            AttributeType::IceControlled => AttributeValue::IceControlled(fixed_u64(type_code, raw)?),
            AttributeType::IceControlling => {
                AttributeValue::IceControlling(fixed_u64(type_code, raw)?)
            }
            AttributeType::PasswordAlgorithm
            | AttributeType::PasswordAlgorithms
            | AttributeType::UserHash
            | AttributeType::Unknown(_) => AttributeValue::Opaque(raw.to_vec()),
        };

        Ok(value)
    }
}

/// Typed view of an attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    MappedAddress(SocketAddr),
    XorMappedAddress(SocketAddr),
    AlternateServer(SocketAddr),
    ResponseOrigin(SocketAddr),
    OtherAddress(SocketAddr),
    Username(String),
    Realm(String),
    Software(String),
    AlternateDomain(String),
    Nonce(Vec<u8>),
    ErrorCode { code: u16, reason: String },
    UnknownAttributes(Vec<u16>),
    MessageIntegrity(Vec<u8>),
    MessageIntegritySha256(Vec<u8>),
    Fingerprint(u32),
    Priority(u32),
    UseCandidate,
    IceControlled(u64),
    IceControlling(u64),
    /// Types without a structured decoder, kept as raw bytes
    Opaque(Vec<u8>),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MappedAddress(addr)
            | Self::XorMappedAddress(addr)
            | Self::AlternateServer(addr)
            | Self::ResponseOrigin(addr)
            | Self::OtherAddress(addr) => write!(f, "{}", addr),
            Self::Username(s) | Self::Realm(s) | Self::Software(s) | Self::AlternateDomain(s) => {
                write!(f, "{:?}", s)
            }
            Self::Nonce(bytes)
            | Self::MessageIntegrity(bytes)
            | Self::MessageIntegritySha256(bytes)
            | Self::Opaque(bytes) => f.write_str(&hex(bytes)),
            Self::ErrorCode { code, reason } => write!(f, "{} {}", code, reason),
            Self::UnknownAttributes(types) => {
                let list: Vec<String> = types
                    .iter()
                    .map(|t| AttributeType::from_u16(*t).to_string())
                    .collect();
                write!(f, "[{}]", list.join(", "))
            }
            Self::Fingerprint(crc) => write!(f, "0x{:08x}", crc),
            Self::Priority(priority) => write!(f, "{}", priority),
            Self::UseCandidate => f.write_str("set"),
            Self::IceControlled(tie) | Self::IceControlling(tie) => write!(f, "tie-breaker 0x{:016x}", tie),
        }
    }
}

/// STUN message
///
/// The attribute list and `raw` are kept in sync by every constructor, so a
/// decoded message re-encodes to the bytes it was decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    message_type: MessageType,
    transaction_id: TransactionId,
    attributes: Vec<Attribute>,
    raw: Vec<u8>,
}

impl Message {
    /// Create new STUN message with an empty attribute list
    pub fn new(message_type: MessageType, transaction_id: TransactionId) -> Self {
        let mut raw = Vec::with_capacity(HEADER_SIZE + 64);
        write_header(&mut raw, message_type, 0, &transaction_id);

        Self {
            message_type,
            transaction_id,
            attributes: Vec::new(),
            raw,
        }
    }

    /// Binding request with a fresh transaction ID
    pub fn binding_request() -> Self {
        Self::new(MessageType::BINDING_REQUEST, TransactionId::new())
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Encoded bytes of the whole message
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Get first attribute of a type
    pub fn get_attribute(&self, attr_type: AttributeType) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    /// Append an attribute, updating the length field of `raw`
    pub fn add_attribute(&mut self, attribute: Attribute) -> Result<(), StunError> {
        let body_len = self.raw.len() - HEADER_SIZE + ATTRIBUTE_HEADER_SIZE + padded_len(attribute.value.len());
        if attribute.value.len() > u16::MAX as usize || body_len > u16::MAX as usize {
            return Err(StunError::MessageTooLarge(body_len));
        }

        write_attribute(&mut self.raw, &attribute);
        set_length(&mut self.raw, body_len);
        self.attributes.push(attribute);
        Ok(())
    }

    /// Append SOFTWARE
    pub fn add_software(&mut self, description: &str) -> Result<(), StunError> {
        self.add_attribute(Attribute::software(description))
    }

    /// Append XOR-MAPPED-ADDRESS for `addr`
    pub fn add_xor_mapped_address(&mut self, addr: SocketAddr) -> Result<(), StunError> {
        let attribute = Attribute::xor_mapped_address(addr, &self.transaction_id);
        self.add_attribute(attribute)
    }

    /// Append FINGERPRINT computed over everything added so far
    pub fn add_fingerprint(&mut self) -> Result<(), StunError> {
        let body_len = self.raw.len() - HEADER_SIZE + FINGERPRINT_SIZE;
        if body_len > u16::MAX as usize {
            return Err(StunError::MessageTooLarge(body_len));
        }

        // The CRC covers the header with its final length
        set_length(&mut self.raw, body_len);
        let crc = CRC32.checksum(&self.raw) ^ FINGERPRINT_XOR;
        self.add_attribute(Attribute::new(AttributeType::Fingerprint, crc.to_be_bytes().to_vec()))
    }

    /// Check FINGERPRINT; `None` when the message carries none
    pub fn verify_fingerprint(&self) -> Option<bool> {
        let mut offset = HEADER_SIZE;

        for attribute in &self.attributes {
            if attribute.attr_type == AttributeType::Fingerprint {
                if attribute.value.len() != 4 {
                    return Some(false);
                }
                let mut covered = self.raw[..offset].to_vec();
                set_length(&mut covered, offset - HEADER_SIZE + FINGERPRINT_SIZE);
                let computed = CRC32.checksum(&covered) ^ FINGERPRINT_XOR;
                let expected = u32::from_be_bytes([
                    attribute.value[0],
                    attribute.value[1],
                    attribute.value[2],
                    attribute.value[3],
                ]);
                return Some(computed == expected);
            }
            offset += ATTRIBUTE_HEADER_SIZE + padded_len(attribute.value.len());
        }

        None
    }

    /// Decoded XOR-MAPPED-ADDRESS, if present and well formed
    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        let attribute = self.get_attribute(AttributeType::XorMappedAddress)?;
        decode_address(&attribute.value, Some(&self.transaction_id)).ok()
    }

    /// Serialize header and attributes in insertion order
    pub fn encode(&self) -> Bytes {
        let body_len: usize = self
            .attributes
            .iter()
            .map(|a| ATTRIBUTE_HEADER_SIZE + padded_len(a.value.len()))
            .sum();

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + body_len);
        write_header(&mut buf, self.message_type, body_len as u16, &self.transaction_id);
        for attribute in &self.attributes {
            write_attribute(&mut buf, attribute);
        }

        buf.freeze()
    }

    /// Decode message from bytes
    ///
    /// Bytes past the declared message length are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, StunError> {
        if buf.len() < HEADER_SIZE {
            return Err(StunError::Truncated {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }

        let mut header = &buf[..HEADER_SIZE];
        let type_raw = header.get_u16();
        let msg_len = header.get_u16() as usize;
        let magic = header.get_u32();

        if magic != MAGIC_COOKIE {
            return Err(StunError::InvalidMagicCookie(magic));
        }
        if type_raw & 0xC000 != 0 {
            return Err(StunError::InvalidMessageType(type_raw));
        }

        let full_len = HEADER_SIZE + msg_len;
        if buf.len() < full_len {
            return Err(StunError::Truncated {
                expected: full_len,
                actual: buf.len(),
            });
        }

        let mut tid_bytes = [0u8; 12];
        header.copy_to_slice(&mut tid_bytes);

        let mut body = &buf[HEADER_SIZE..full_len];
        let mut attributes = Vec::new();

        while body.has_remaining() {
            if body.remaining() < ATTRIBUTE_HEADER_SIZE {
                return Err(StunError::Truncated {
                    expected: ATTRIBUTE_HEADER_SIZE,
                    actual: body.remaining(),
                });
            }

            let attr_type = body.get_u16();
            let attr_len = body.get_u16() as usize;
            let padded = padded_len(attr_len);

            if body.remaining() < padded {
                return Err(StunError::BadAttributeLength {
                    attr_type,
                    length: attr_len,
                    remaining: body.remaining(),
                });
            }

            let mut attribute = Attribute::new(AttributeType::from_u16(attr_type), body[..attr_len].to_vec());
            attribute.padding[..padded - attr_len].copy_from_slice(&body[attr_len..padded]);
            attributes.push(attribute);
            body.advance(padded);
        }

        Ok(Self {
            message_type: MessageType::from_value(type_raw),
            transaction_id: TransactionId::from_bytes(tid_bytes),
            attributes,
            raw: buf[..full_len].to_vec(),
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} l={} attrs={} id={}",
            self.message_type,
            self.raw.len() - HEADER_SIZE,
            self.attributes.len(),
            self.transaction_id
        )
    }
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn write_header<B: BufMut>(buf: &mut B, message_type: MessageType, length: u16, tid: &TransactionId) {
    buf.put_u16(message_type.value());
    buf.put_u16(length);
    buf.put_u32(MAGIC_COOKIE);
    buf.put_slice(tid.as_bytes());
}

fn write_attribute<B: BufMut>(buf: &mut B, attribute: &Attribute) {
    buf.put_u16(attribute.attr_type.value());
    buf.put_u16(attribute.length());
    buf.put_slice(&attribute.value);
    buf.put_slice(attribute.padding());
}

fn set_length(raw: &mut [u8], body_len: usize) {
    raw[2..4].copy_from_slice(&(body_len as u16).to_be_bytes());
}

/// Encode IP address; XOR-obfuscated when `xor` carries the transaction ID
fn encode_address<B: BufMut>(buf: &mut B, addr: &SocketAddr, xor: Option<&TransactionId>) {
    buf.put_u8(0); // Reserved

    let port = match xor {
        Some(_) => addr.port() ^ (MAGIC_COOKIE >> 16) as u16,
        None => addr.port(),
    };

    match addr.ip() {
        IpAddr::V4(ip) => {
            buf.put_u8(FAMILY_IPV4);
            buf.put_u16(port);
            let mut octets = ip.octets();
            if xor.is_some() {
                xor_in_place(&mut octets, &MAGIC_COOKIE.to_be_bytes());
            }
            buf.put_slice(&octets);
        }
        IpAddr::V6(ip) => {
            buf.put_u8(FAMILY_IPV6);
            buf.put_u16(port);
            let mut octets = ip.octets();
            if let Some(tid) = xor {
                xor_in_place(&mut octets, &xor_key_v6(tid));
            }
            buf.put_slice(&octets);
        }
    }
}

/// Decode IP address
fn decode_address(mut buf: &[u8], xor: Option<&TransactionId>) -> Result<SocketAddr, StunError> {
    if buf.remaining() < 4 {
        return Err(StunError::AttributeParseError {
            attr_type: if xor.is_some() { 0x0020 } else { 0x0001 },
            reason: "address too short".to_string(),
        });
    }

    buf.advance(1); // Reserved
    let family = buf.get_u8();
    let port = match xor {
        Some(_) => buf.get_u16() ^ (MAGIC_COOKIE >> 16) as u16,
        None => buf.get_u16(),
    };

    match family {
        FAMILY_IPV4 if buf.remaining() == 4 => {
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            if xor.is_some() {
                xor_in_place(&mut octets, &MAGIC_COOKIE.to_be_bytes());
            }
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        FAMILY_IPV6 if buf.remaining() == 16 => {
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            if let Some(tid) = xor {
                xor_in_place(&mut octets, &xor_key_v6(tid));
            }
            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => Err(StunError::InvalidAddressFamily(family)),
    }
}

fn xor_key_v6(tid: &TransactionId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    key[4..].copy_from_slice(tid.as_bytes());
    key
}

fn xor_in_place(target: &mut [u8], key: &[u8]) {
    for (byte, k) in target.iter_mut().zip(key) {
        *byte ^= k;
    }
}

fn utf8(attr_type: u16, raw: &[u8]) -> Result<String, StunError> {
    String::from_utf8(raw.to_vec()).map_err(|e| StunError::AttributeParseError {
        attr_type,
        reason: e.to_string(),
    })
}

fn fixed_u32(attr_type: u16, raw: &[u8]) -> Result<u32, StunError> {
    let bytes: [u8; 4] = raw.try_into().map_err(|_| StunError::AttributeParseError {
        attr_type,
        reason: format!("expected 4 bytes, got {}", raw.len()),
    })?;
    Ok(u32::from_be_bytes(bytes))
}

fn fixed_u64(attr_type: u16, raw: &[u8]) -> Result<u64, StunError> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| StunError::AttributeParseError {
        attr_type,
        reason: format!("expected 8 bytes, got {}", raw.len()),
    })?;
    Ok(u64::from_be_bytes(bytes))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
