//! HPACK worker pair: one encoder and one decoder per connection.
//!
//! Thin wrappers over the `hpack` crate that add request assembly (pseudo-
//! headers plus RFC 9113 Section 8.2 header hygiene) on the encode side and
//! string conversion on the decode side. Both workers carry the dynamic
//! table state announced through SETTINGS_HEADER_TABLE_SIZE.

use bytes::Bytes;
use http::{Method, Uri};

use crate::error::{Error, Result};
use crate::frame::ErrorCode;
use crate::settings::DEFAULT_HEADER_TABLE_SIZE;

/// HPACK encoder worker.
pub struct HpackEncoder {
    inner: hpack::Encoder<'static>,
    max_table_size: usize,
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: hpack::Encoder::new(),
            max_table_size: DEFAULT_HEADER_TABLE_SIZE as usize,
        }
    }

    /// Honor the peer's SETTINGS_HEADER_TABLE_SIZE.
    ///
    /// The backing encoder never grows its table past the protocol default,
    /// so only a shrink below that needs action: the encoder is reset so no
    /// entry the peer may evict can still be referenced.
    pub fn update_max_table_size(&mut self, size: usize) {
        if size < self.max_table_size && size < DEFAULT_HEADER_TABLE_SIZE as usize {
            self.inner = hpack::Encoder::new();
        }
        self.max_table_size = size;
    }

    /// Encode a request header block: pseudo-headers first (`:method`,
    /// `:scheme`, `:authority`, `:path`), then the regular headers.
    ///
    /// Names are lowercased and connection-specific headers forbidden by
    /// RFC 9113 Section 8.2.2 are dropped (`te` survives only as
    /// `te: trailers`).
    pub fn encode_request(
        &mut self,
        method: &Method,
        uri: &Uri,
        headers: &[(String, String)],
    ) -> Result<Bytes> {
        let scheme = uri.scheme_str().unwrap_or("https");
        let authority = uri.authority().map(|a| a.as_str()).unwrap_or_default();
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

        if authority.is_empty() {
            return Err(Error::protocol(
                ErrorCode::ProtocolError,
                ":authority pseudo-header cannot be empty",
            ));
        }

        // Owned storage for the lowercased names; the encoder borrows them.
        let mut regular: Vec<(String, &str)> = Vec::with_capacity(headers.len());
        for (name, value) in headers {
            if name.is_empty() || name.starts_with(':') {
                continue;
            }
            if name
                .as_bytes()
                .iter()
                .any(|&b| !(0x21..=0x7e).contains(&b))
            {
                continue;
            }

            let name_lower = name.to_lowercase();
            match name_lower.as_str() {
                "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding"
                | "upgrade" => continue,
                "te" if !value.eq_ignore_ascii_case("trailers") => continue,
                _ => {}
            }
            regular.push((name_lower, value.as_str()));
        }

        let mut all: Vec<(&[u8], &[u8])> = Vec::with_capacity(4 + regular.len());
        all.push((b":method".as_slice(), method.as_str().as_bytes()));
        all.push((b":scheme".as_slice(), scheme.as_bytes()));
        all.push((b":authority".as_slice(), authority.as_bytes()));
        all.push((b":path".as_slice(), path.as_bytes()));
        for (name, value) in &regular {
            all.push((name.as_bytes(), value.as_bytes()));
        }

        Ok(Bytes::from(self.inner.encode(all)))
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// HPACK decoder worker.
pub struct HpackDecoder {
    inner: hpack::Decoder<'static>,
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: hpack::Decoder::new(),
        }
    }

    /// Honor our SETTINGS_HEADER_TABLE_SIZE, acknowledged by the peer.
    pub fn update_max_table_size(&mut self, size: usize) {
        self.inner.set_max_table_size(size);
    }

    /// Decode a complete header block into a name/value list.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>> {
        let decoded = self.inner.decode(block).map_err(|e| {
            Error::protocol(
                ErrorCode::CompressionError,
                format!("HPACK decoding failed: {:?}", e),
            )
        })?;

        Ok(decoded
            .into_iter()
            .map(|(name, value)| {
                (
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect())
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}
