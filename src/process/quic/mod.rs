//! QUIC Initial packet decryptor.
//!
//! Given a UDP datagram carrying a long-header Initial packet, derives
//! the per-direction Initial keys from the connection id, removes header
//! protection, decrypts the payload, reassembles the CRYPTO stream, and
//! parses the embedded TLS ClientHello for the server name and the
//! Google user agent.
//!
//! Any failure aborts the extraction for this packet only; the flow
//! keeps accumulating and other plugins still run.

mod crypto;
mod tls;
mod varint;

use tracing::debug;

use crate::error::QuicError;
use crate::flow::{Extension, ExtensionId, FlowRecord, EXT_QUIC};
use crate::packet::Packet;
use crate::process::{PluginAction, ProcessPlugin};

use crypto::{derive_initial_keys, header_mask, select_salt, Side, SAMPLE_LEN, TAG_LEN};
use varint::read_varint;

const UDP_PROTO: u8 = 17;
const QUIC_PORT: u16 = 443;

/// QUIC flow extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuicData {
    /// Server name from the ClientHello, empty when not present.
    pub sni: String,
    /// Google user-agent transport parameter, empty when not present.
    pub user_agent: String,
    /// Wire version of the decrypted Initial.
    pub quic_version: u32,
}

/// Offsets of one parsed long header, relative to the datagram start.
#[derive(Debug)]
struct InitialHeader {
    version: u32,
    dcid: std::ops::Range<usize>,
    scid: std::ops::Range<usize>,
    /// Where the protected packet-number field begins.
    pkn_offset: usize,
    /// Value of the Length field: packet number plus protected payload.
    length: usize,
}

/// Long header form with Initial packet type.
fn is_initial(first_byte: u8) -> bool {
    first_byte & 0xb0 == 0x80
}

fn parse_initial_header(data: &[u8]) -> Result<InitialHeader, QuicError> {
    if data.len() < 6 {
        return Err(QuicError::Truncated {
            context: "long header",
        });
    }

    let version = u32::from_be_bytes(data[1..5].try_into().unwrap());
    if version == 0 {
        return Err(QuicError::ZeroVersion);
    }

    let mut pos = 5;
    let dcid_len = data[pos] as usize;
    pos += 1;
    if pos + dcid_len > data.len() {
        return Err(QuicError::Truncated { context: "dcid" });
    }
    let dcid = pos..pos + dcid_len;
    pos += dcid_len;

    if pos >= data.len() {
        return Err(QuicError::Truncated {
            context: "scid length",
        });
    }
    let scid_len = data[pos] as usize;
    pos += 1;
    if pos + scid_len > data.len() {
        return Err(QuicError::Truncated { context: "scid" });
    }
    let scid = pos..pos + scid_len;
    pos += scid_len;

    let token_len = read_varint(data, &mut pos).ok_or(QuicError::Truncated {
        context: "token length",
    })? as usize;
    if pos.checked_add(token_len).map_or(true, |p| p > data.len()) {
        return Err(QuicError::Truncated { context: "token" });
    }
    pos += token_len;

    let length = read_varint(data, &mut pos).ok_or(QuicError::Truncated {
        context: "payload length",
    })? as usize;
    if pos.checked_add(length).map_or(true, |p| p > data.len()) {
        return Err(QuicError::Truncated {
            context: "protected payload",
        });
    }

    // The sample sits a fixed 4 bytes past the packet-number start,
    // regardless of the real packet-number length.
    if pos + 4 + SAMPLE_LEN > data.len() {
        return Err(QuicError::Truncated { context: "sample" });
    }

    Ok(InitialHeader {
        version,
        dcid,
        scid,
        pkn_offset: pos,
        length,
    })
}

/// Rebuild the contiguous CRYPTO stream from the decrypted payload.
///
/// Fragments land at `4 + offset`; the leading four bytes form the
/// synthesized record prefix the ClientHello parser expects. PADDING,
/// PING, ACK and CONNECTION_CLOSE are skipped one byte at a time; ACK
/// frames with non-trivial bodies are therefore not handled and any
/// other frame type aborts.
fn assemble_crypto(payload: &[u8]) -> Result<Vec<u8>, QuicError> {
    let mut out = vec![0u8; payload.len() + 4];
    out[0] = 0x06;

    let mut pos = 0;
    while pos < payload.len() {
        match payload[pos] {
            0x06 => {
                pos += 1;
                let offset = read_varint(payload, &mut pos).ok_or(QuicError::Truncated {
                    context: "crypto offset",
                })? as usize;
                let len = read_varint(payload, &mut pos).ok_or(QuicError::Truncated {
                    context: "crypto length",
                })? as usize;

                if pos.checked_add(len).map_or(true, |p| p > payload.len()) {
                    return Err(QuicError::FragmentOutOfBounds);
                }
                let dst = offset.checked_add(4).ok_or(QuicError::FragmentOutOfBounds)?;
                let dst_end = dst.checked_add(len).ok_or(QuicError::FragmentOutOfBounds)?;
                if dst_end > out.len() {
                    return Err(QuicError::FragmentOutOfBounds);
                }

                out[dst..dst_end].copy_from_slice(&payload[pos..pos + len]);
                pos += len;
            }
            // PADDING, PING, ACK, ACK_ECN, CONNECTION_CLOSE.
            0x00 | 0x01 | 0x02 | 0x03 | 0x1c => pos += 1,
            other => return Err(QuicError::UnexpectedFrame(other)),
        }
    }
    Ok(out)
}

/// Process plugin decrypting QUIC Initial packets.
#[derive(Debug, Default)]
pub struct QuicPlugin {
    decrypt_buf: Vec<u8>,
    /// ClientHellos successfully parsed since construction.
    parsed_initials: u64,
}

impl QuicPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of Initials from which SNI or user agent was extracted.
    pub fn parsed_initials(&self) -> u64 {
        self.parsed_initials
    }

    fn process(&mut self, pkt: &Packet) -> Result<QuicData, QuicError> {
        if pkt.ip_proto != UDP_PROTO
            || pkt.payload.is_empty()
            || !is_initial(pkt.payload[0])
        {
            return Err(QuicError::NotInitial);
        }

        let data = &pkt.payload[..];
        let hdr = parse_initial_header(data)?;

        // Direction by port: the server side listens on 443. The Initial
        // keys come from the DCID for client-sent packets and from the
        // SCID for server-sent ones.
        let (side, cid) = if pkt.dst_port == QUIC_PORT {
            (Side::ClientIn, &data[hdr.dcid.clone()])
        } else if pkt.src_port == QUIC_PORT {
            (Side::ServerIn, &data[hdr.scid.clone()])
        } else {
            return Err(QuicError::NotInitial);
        };

        let keys = derive_initial_keys(hdr.version, cid, side)?;
        let (_, google) = select_salt(hdr.version);

        // Header protection mask from the fixed-offset sample.
        let sample = &data[hdr.pkn_offset + 4..hdr.pkn_offset + 4 + SAMPLE_LEN];
        let mask = header_mask(&keys.hp, sample)?;

        // Unmask the first byte, then the now-known packet number.
        let mut header = data[..hdr.pkn_offset + 4].to_vec();
        header[0] ^= mask[0] & 0x0f;
        let pkn_len = usize::from(header[0] & 0x03) + 1;
        header.truncate(hdr.pkn_offset + pkn_len);

        let mut packet_number: u32 = 0;
        for i in 0..pkn_len {
            header[hdr.pkn_offset + i] ^= mask[1 + i];
            packet_number = packet_number << 8 | u32::from(header[hdr.pkn_offset + i]);
        }

        if hdr.length <= pkn_len + TAG_LEN {
            return Err(QuicError::Truncated {
                context: "protected payload",
            });
        }
        let ciphertext = &data[hdr.pkn_offset + pkn_len..hdr.pkn_offset + hdr.length];

        crypto::decrypt_payload(
            &keys,
            packet_number,
            &header,
            ciphertext,
            &mut self.decrypt_buf,
        )?;

        let mut rec = QuicData {
            quic_version: hdr.version,
            ..Default::default()
        };

        // Google dialects do not carry an IETF ClientHello; a verified
        // decryption is the whole result.
        if google {
            return Ok(rec);
        }

        let assembled = assemble_crypto(&self.decrypt_buf)?;
        let fields = tls::parse_client_hello(&assembled)?;
        if !fields.any() {
            return Err(QuicError::MalformedClientHello);
        }
        rec.sni = fields.sni.unwrap_or_default();
        rec.user_agent = fields.user_agent.unwrap_or_default();
        self.parsed_initials += 1;
        Ok(rec)
    }

    fn try_attach(&mut self, flow: &mut FlowRecord, pkt: &Packet) {
        match self.process(pkt) {
            Ok(data) => flow.add_extension(Extension::Quic(data)),
            Err(QuicError::NotInitial) => {}
            Err(err) => debug!(%err, "quic initial extraction aborted"),
        }
    }
}

impl ProcessPlugin for QuicPlugin {
    fn name(&self) -> &'static str {
        "quic"
    }

    fn ext_id(&self) -> ExtensionId {
        EXT_QUIC
    }

    fn post_create(&mut self, flow: &mut FlowRecord, pkt: &Packet) -> PluginAction {
        self.try_attach(flow, pkt);
        PluginAction::OK
    }

    fn post_update(&mut self, flow: &mut FlowRecord, pkt: &Packet) -> PluginAction {
        // Later Initials (e.g. a retransmit, or the server side) refine
        // an already-decrypted flow only.
        if flow.extension(EXT_QUIC).is_some() {
            self.try_attach(flow, pkt);
        }
        PluginAction::OK
    }
}
