// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TLS ClientHello parsing, just far enough to read the SNI host name.
//!
//! ```text
//! record     type(1)=0x16 version(2) length(2) fragment
//! handshake  type(1)=0x01 length(3) body
//! body       version(2) random(32) session_id<1> cipher_suites<2>
//!            compression_methods<1> extensions<2>
//! extension  type(2) length(2) data        server_name has type 0
//! sni data   list<2> { name_type(1)=0 host_name<2> }
//! ```

/// Largest TLSPlaintext fragment a peer may send.
const MAX_RECORD_LEN: usize = 16384 + 2048;
const RECORD_HEADER_LEN: usize = 5;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST_NAME: u8 = 0x00;
const MAX_HOST_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SniError {
    /// More bytes are needed before the first record can be parsed.
    #[error("incomplete TLS record")]
    Incomplete,

    #[error("not a TLS handshake record")]
    NotTls,

    #[error("handshake is not a ClientHello")]
    NotClientHello,

    #[error("malformed ClientHello")]
    Malformed,

    #[error("ClientHello carries no server name")]
    Missing,

    #[error("invalid server name")]
    InvalidHostName,
}

/// Extract the SNI host name from the start of a TLS stream.
///
/// Returns [`SniError::Incomplete`] while the first record has not fully
/// arrived; every other error is final.
pub fn server_name(data: &[u8]) -> Result<String, SniError> {
    if data.len() < RECORD_HEADER_LEN {
        return Err(SniError::Incomplete);
    }
    if data[0] != CONTENT_TYPE_HANDSHAKE {
        return Err(SniError::NotTls);
    }

    let record_len = u16::from_be_bytes([data[3], data[4]]) as usize;
    if record_len > MAX_RECORD_LEN {
        return Err(SniError::NotTls);
    }
    let Some(fragment) = data.get(RECORD_HEADER_LEN..RECORD_HEADER_LEN + record_len) else {
        return Err(SniError::Incomplete);
    };

    let mut record = Reader::new(fragment);
    if record.u8()? != HANDSHAKE_CLIENT_HELLO {
        return Err(SniError::NotClientHello);
    }
    let body_len = record.u24()?;
    let mut hello = Reader::new(record.take(body_len)?);

    hello.skip(2 + 32)?;
    let session_id = hello.u8()? as usize;
    hello.skip(session_id)?;
    let cipher_suites = hello.u16()? as usize;
    hello.skip(cipher_suites)?;
    let compression = hello.u8()? as usize;
    hello.skip(compression)?;

    if hello.is_empty() {
        return Err(SniError::Missing);
    }
    let extensions_len = hello.u16()? as usize;
    let mut extensions = Reader::new(hello.take(extensions_len)?);

    while !extensions.is_empty() {
        let kind = extensions.u16()?;
        let len = extensions.u16()? as usize;
        let data = extensions.take(len)?;
        if kind == EXTENSION_SERVER_NAME {
            return parse_server_name_extension(data);
        }
    }
    Err(SniError::Missing)
}

fn parse_server_name_extension(data: &[u8]) -> Result<String, SniError> {
    let mut ext = Reader::new(data);
    let list_len = ext.u16()? as usize;
    let mut list = Reader::new(ext.take(list_len)?);

    while !list.is_empty() {
        let name_type = list.u8()?;
        let len = list.u16()? as usize;
        let name = list.take(len)?;
        if name_type == NAME_TYPE_HOST_NAME {
            return validate_host_name(name);
        }
    }
    Err(SniError::Missing)
}

/// Accept LDH host names only, lower-cased, without a trailing dot.
fn validate_host_name(raw: &[u8]) -> Result<String, SniError> {
    let name = std::str::from_utf8(raw).map_err(|_| SniError::InvalidHostName)?;
    let name = name.strip_suffix('.').unwrap_or(name);

    if name.is_empty() || name.len() > MAX_HOST_NAME_LEN {
        return Err(SniError::InvalidHostName);
    }
    let labels_ok = name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    });
    if !labels_ok {
        return Err(SniError::InvalidHostName);
    }
    Ok(name.to_ascii_lowercase())
}

/// Bounds-checked big-endian reader. Running off the end is `Malformed`
/// because callers only parse complete records.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SniError> {
        let end = self.pos.checked_add(n).ok_or(SniError::Malformed)?;
        let slice = self.buf.get(self.pos..end).ok_or(SniError::Malformed)?;
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), SniError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, SniError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SniError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<usize, SniError> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }
}
