//! permessage-deflate (RFC 7692).
//!
//! Messages are compressed with a raw DEFLATE stream and a sync flush, and
//! the trailing `00 00 FF FF` is removed before sending. The compression
//! context is kept between messages unless the peer negotiated
//! `*_no_context_takeover` for that direction.
//!
//! The flate2 backend always uses a 32 KiB window. An offer that asks the
//! server to compress with a smaller window is declined, and a client
//! never offers `client_max_window_bits`. Inflating accepts any window size.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use tracing::trace;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::extensions::{Extension, ExtensionOffer, ExtensionParam, ExtensionProvider};
use crate::protocol::{Frame, Role, RsvBits};

pub const EXTENSION_NAME: &str = "permessage-deflate";

const MIN_WINDOW_BITS: u8 = 8;
const MAX_WINDOW_BITS: u8 = 15;
const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

/// Local preferences for permessage-deflate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeflateConfig {
    /// Ask (client) or require (server) that the server reset its
    /// compression context after every message.
    pub server_no_context_takeover: bool,
    /// Ask (client) or require (server) that the client reset its
    /// compression context after every message.
    pub client_no_context_takeover: bool,
    /// zlib compression level, 0-9.
    pub compression_level: u32,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            compression_level: 6,
        }
    }
}

impl DeflateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn server_no_context_takeover(mut self, value: bool) -> Self {
        self.server_no_context_takeover = value;
        self
    }

    #[must_use]
    pub fn client_no_context_takeover(mut self, value: bool) -> Self {
        self.client_no_context_takeover = value;
        self
    }

    /// # Errors
    ///
    /// Returns `Error::Extension` if `level` is above 9.
    pub fn compression_level(mut self, level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::Extension(format!(
                "compression level must be 0-9, got {level}"
            )));
        }
        self.compression_level = level;
        Ok(self)
    }
}

fn parse_window_bits(value: Option<&str>) -> Option<u8> {
    match value {
        None => Some(MAX_WINDOW_BITS),
        Some(s) => s
            .parse::<u8>()
            .ok()
            .filter(|bits| (MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(bits)),
    }
}

/// Parameters in force once both sides agreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Agreement {
    server_no_context_takeover: bool,
    client_no_context_takeover: bool,
}

impl Agreement {
    fn from_params(params: &ExtensionOffer) -> Self {
        Self {
            server_no_context_takeover: params.has_param(SERVER_NO_CONTEXT_TAKEOVER),
            client_no_context_takeover: params.has_param(CLIENT_NO_CONTEXT_TAKEOVER),
        }
    }
}

fn has_duplicates(offer: &ExtensionOffer) -> bool {
    offer
        .params
        .iter()
        .enumerate()
        .any(|(i, p)| offer.params[..i].iter().any(|q| q.name == p.name))
}

/// Provider for the permessage-deflate extension.
#[derive(Debug, Clone, Default)]
pub struct DeflateProvider {
    config: DeflateConfig,
}

impl DeflateProvider {
    #[must_use]
    pub fn new(config: DeflateConfig) -> Self {
        Self { config }
    }
}

impl ExtensionProvider for DeflateProvider {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn rsv_bits(&self) -> RsvBits {
        RsvBits::RSV1
    }

    fn request(&self) -> ExtensionOffer {
        let mut offer = ExtensionOffer::new(EXTENSION_NAME);
        if self.config.server_no_context_takeover {
            offer = offer.with_param(ExtensionParam::flag(SERVER_NO_CONTEXT_TAKEOVER));
        }
        if self.config.client_no_context_takeover {
            offer = offer.with_param(ExtensionParam::flag(CLIENT_NO_CONTEXT_TAKEOVER));
        }
        offer
    }

    fn offer(&self, requested: &ExtensionOffer) -> Option<ExtensionOffer> {
        if requested.name != EXTENSION_NAME || has_duplicates(requested) {
            return None;
        }

        let mut server_reset = self.config.server_no_context_takeover;
        let mut client_reset = self.config.client_no_context_takeover;
        for param in &requested.params {
            match param.name.as_str() {
                SERVER_NO_CONTEXT_TAKEOVER if param.value.is_none() => server_reset = true,
                CLIENT_NO_CONTEXT_TAKEOVER if param.value.is_none() => client_reset = true,
                SERVER_MAX_WINDOW_BITS => {
                    // Only a full-size window can be honored.
                    if parse_window_bits(param.value.as_deref())? != MAX_WINDOW_BITS {
                        return None;
                    }
                }
                CLIENT_MAX_WINDOW_BITS => {
                    parse_window_bits(param.value.as_deref())?;
                }
                _ => return None,
            }
        }

        let mut accepted = ExtensionOffer::new(EXTENSION_NAME);
        if server_reset {
            accepted = accepted.with_param(ExtensionParam::flag(SERVER_NO_CONTEXT_TAKEOVER));
        }
        if client_reset {
            accepted = accepted.with_param(ExtensionParam::flag(CLIENT_NO_CONTEXT_TAKEOVER));
        }
        Some(accepted)
    }

    fn accept_response(&self, response: &ExtensionOffer) -> Result<()> {
        if has_duplicates(response) {
            return Err(Error::handshake(format!(
                "duplicate parameter in {EXTENSION_NAME} response"
            )));
        }
        for param in &response.params {
            match param.name.as_str() {
                SERVER_NO_CONTEXT_TAKEOVER | CLIENT_NO_CONTEXT_TAKEOVER
                    if param.value.is_none() => {}
                SERVER_MAX_WINDOW_BITS if param.value.is_some() => {
                    parse_window_bits(param.value.as_deref()).ok_or_else(|| {
                        Error::handshake(format!("invalid {SERVER_MAX_WINDOW_BITS} in response"))
                    })?;
                }
                _ => {
                    return Err(Error::handshake(format!(
                        "unexpected {EXTENSION_NAME} parameter '{param}' in response"
                    )));
                }
            }
        }
        if self.config.server_no_context_takeover
            && !response.has_param(SERVER_NO_CONTEXT_TAKEOVER)
        {
            return Err(Error::handshake(format!(
                "server ignored requested {SERVER_NO_CONTEXT_TAKEOVER}"
            )));
        }
        Ok(())
    }

    fn build(
        &self,
        role: Role,
        agreed: &ExtensionOffer,
        limits: &Limits,
    ) -> Result<Box<dyn Extension>> {
        let agreement = Agreement::from_params(agreed);
        let (own_reset, peer_reset) = match role {
            Role::Server => (
                agreement.server_no_context_takeover,
                agreement.client_no_context_takeover,
            ),
            Role::Client => (
                agreement.client_no_context_takeover,
                agreement.server_no_context_takeover,
            ),
        };
        Ok(Box::new(DeflateExtension {
            level: Compression::new(self.config.compression_level),
            own_no_context_takeover: own_reset,
            peer_no_context_takeover: peer_reset,
            max_message_size: limits.max_message_size,
            compress: None,
            decompress: None,
        }))
    }
}

/// One direction of a permessage-deflate session.
///
/// The compressor and decompressor are created on first use, so the
/// instance used for writing never allocates an inflate window and the
/// other way round.
pub struct DeflateExtension {
    level: Compression,
    own_no_context_takeover: bool,
    peer_no_context_takeover: bool,
    max_message_size: usize,
    compress: Option<Compress>,
    decompress: Option<Decompress>,
}

impl DeflateExtension {
    fn compress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let level = self.level;
        let compress = self
            .compress
            .get_or_insert_with(|| Compress::new(level, false));

        let start = compress.total_in();
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        loop {
            if out.capacity() - out.len() < 64 {
                out.reserve(out.capacity().max(256));
            }
            let consumed = (compress.total_in() - start) as usize;
            compress
                .compress_vec(&data[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| Error::Extension(format!("deflate failed: {e}")))?;
            let consumed = (compress.total_in() - start) as usize;
            if consumed == data.len() && out.len() < out.capacity() {
                break;
            }
        }

        if out.ends_with(&DEFLATE_TRAILER) {
            out.truncate(out.len() - DEFLATE_TRAILER.len());
        }
        if self.own_no_context_takeover {
            compress.reset();
        }
        Ok(out)
    }

    fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let decompress = self
            .decompress
            .get_or_insert_with(|| Decompress::new(false));

        let mut input = Vec::with_capacity(data.len() + DEFLATE_TRAILER.len());
        input.extend_from_slice(data);
        input.extend_from_slice(&DEFLATE_TRAILER);

        let start = decompress.total_in();
        let mut out = Vec::with_capacity((data.len() * 2).min(self.max_message_size) + 64);
        loop {
            if out.capacity() - out.len() < 1024 {
                out.reserve(out.capacity().max(4096));
            }
            let consumed_before = (decompress.total_in() - start) as usize;
            let produced_before = out.len();
            decompress
                .decompress_vec(&input[consumed_before..], &mut out, FlushDecompress::Sync)
                .map_err(|e| Error::Extension(format!("inflate failed: {e}")))?;

            if out.len() > self.max_message_size {
                return Err(Error::MessageTooLarge {
                    size: out.len(),
                    max: self.max_message_size,
                });
            }
            let consumed = (decompress.total_in() - start) as usize;
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
            if consumed == consumed_before && out.len() == produced_before {
                return Err(Error::Extension("inflate made no progress".into()));
            }
        }

        if self.peer_no_context_takeover {
            decompress.reset(false);
        }
        Ok(out)
    }
}

impl Extension for DeflateExtension {
    fn name(&self) -> &str {
        EXTENSION_NAME
    }

    fn rsv_bits(&self) -> RsvBits {
        RsvBits::RSV1
    }

    fn encode(&mut self, frame: &mut Frame) -> Result<()> {
        // empty messages go out uncompressed
        if frame.payload.is_empty() {
            return Ok(());
        }
        let compressed = self.compress(&frame.payload)?;
        trace!(
            original = frame.payload.len(),
            compressed = compressed.len(),
            "deflated message"
        );
        frame.payload = compressed;
        frame.rsv = frame.rsv.union(RsvBits::RSV1);
        Ok(())
    }

    fn decode(&mut self, frame: &mut Frame) -> Result<()> {
        if !frame.rsv.contains(RsvBits::RSV1) {
            return Ok(());
        }
        frame.payload = if frame.payload.is_empty() {
            Vec::new()
        } else {
            self.decompress(&frame.payload)?
        };
        frame.rsv = frame.rsv.difference(RsvBits::RSV1);
        Ok(())
    }
}
