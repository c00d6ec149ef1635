//! TLS handshake plugin.
//!
//! Parses the first packets of a TLS session directly from the
//! transport payload: the server name, the negotiated ALPN (from the
//! ServerHello), the handshake version, and a JA3 fingerprint of the
//! ClientHello.

use md5::{Digest, Md5};

use crate::flow::{Extension, ExtensionId, FlowRecord, EXT_TLS};
use crate::packet::Packet;
use crate::process::{PluginAction, ProcessPlugin};

const REC_HANDSHAKE: u8 = 0x16;
const HS_CLIENT_HELLO: u8 = 0x01;
const HS_SERVER_HELLO: u8 = 0x02;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;
const EXT_ALPN: u16 = 0x0010;

/// Longest server-name / ALPN list copied into a flow record.
const MAX_FIELD_LEN: usize = 255;

/// TLS flow extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsData {
    /// Handshake version from the ClientHello.
    pub version: u16,
    /// Server name, empty when not present.
    pub sni: String,
    /// Negotiated protocols from the server's ALPN, ';'-separated.
    pub alpn: String,
    /// JA3 hash of the ClientHello, lowercase hex.
    pub ja3: String,
}

/// Reserved GREASE values (draft-ietf-tls-grease-01).
fn is_grease_value(val: u16) -> bool {
    val != 0 && val & !0xfafa == 0 && val & 0x00ff == val >> 8
}

/// What one parsed hello contributed.
#[derive(Debug, Default)]
struct HelloSummary {
    client: bool,
    version: u16,
    sni: Option<String>,
    alpn: Option<String>,
    ja3: Option<String>,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u16(&mut self) -> Option<u16> {
        let b = self.buf.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let b = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(b)
    }
}

/// Parse one handshake record from the start of a transport payload.
fn parse_hello(payload: &[u8]) -> Option<HelloSummary> {
    let mut r = Reader::new(payload);

    // Record layer: handshake, version 3.x.
    if r.u8()? != REC_HANDSHAKE {
        return None;
    }
    if r.u8()? != 3 || r.u8()? > 3 {
        return None;
    }
    let _record_len = r.u16()?;

    let hs_type = r.u8()?;
    if hs_type != HS_CLIENT_HELLO && hs_type != HS_SERVER_HELLO {
        return None;
    }
    r.take(3)?; // handshake length

    let version = r.u16()?;
    if version >> 8 != 3 || !(1..=3).contains(&(version & 0xff)) {
        return None;
    }

    r.take(32)?; // random
    let session_len = r.u8()? as usize;
    r.take(session_len)?;

    let mut summary = HelloSummary {
        client: hs_type == HS_CLIENT_HELLO,
        version,
        ..Default::default()
    };

    let mut ciphers = Vec::new();
    if summary.client {
        let ciphers_len = r.u16()? as usize;
        let raw = r.take(ciphers_len)?;
        for pair in raw.chunks_exact(2) {
            let id = u16::from_be_bytes([pair[0], pair[1]]);
            if !is_grease_value(id) {
                ciphers.push(id);
            }
        }
        let comp_len = r.u8()? as usize;
        r.take(comp_len)?;
    } else {
        r.take(2)?; // cipher suite
        r.take(1)?; // compression method
    }

    let ext_len = r.u16()? as usize;
    let ext_end = payload.len().min(r.pos + ext_len);

    let mut ext_types = Vec::new();
    let mut curves = Vec::new();
    let mut formats = Vec::new();

    while r.pos + 4 <= ext_end {
        let ext_type = r.u16()?;
        let len = r.u16()? as usize;
        if r.pos + len > ext_end {
            break;
        }
        let data = r.take(len)?;

        if summary.client {
            if !is_grease_value(ext_type) {
                ext_types.push(ext_type);
            }
            match ext_type {
                EXT_SERVER_NAME => {
                    if summary.sni.is_none() {
                        summary.sni = parse_server_name(data);
                    }
                }
                EXT_SUPPORTED_GROUPS => curves = parse_u16_list(data),
                EXT_EC_POINT_FORMATS => formats = parse_u8_list(data),
                _ => {}
            }
        } else if ext_type == EXT_ALPN {
            summary.alpn = parse_alpn(data);
        }
    }

    if summary.client {
        summary.ja3 = Some(ja3_string(version, &ciphers, &ext_types, &curves, &formats));
    }
    Some(summary)
}

/// First HostName of the server_name list.
fn parse_server_name(data: &[u8]) -> Option<String> {
    if data.len() < 2 {
        return None;
    }
    let list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let end = data.len().min(2 + list_len);

    let mut pos = 2;
    while pos + 3 <= end {
        let name_type = data[pos];
        let name_len = u16::from_be_bytes([data[pos + 1], data[pos + 2]]) as usize;
        pos += 3;
        if pos + name_len > end {
            return None;
        }
        if name_type == 0 {
            let take = name_len.min(MAX_FIELD_LEN);
            return std::str::from_utf8(&data[pos..pos + take])
                .ok()
                .map(String::from);
        }
        pos += name_len;
    }
    None
}

/// All protocol names of the ALPN list, joined with ';'.
fn parse_alpn(data: &[u8]) -> Option<String> {
    if data.len() < 2 {
        return None;
    }
    let list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let end = data.len().min(2 + list_len);

    let mut out = String::new();
    let mut pos = 2;
    while pos < end {
        let len = data[pos] as usize;
        pos += 1;
        if pos + len > end {
            break;
        }
        let Ok(name) = std::str::from_utf8(&data[pos..pos + len]) else {
            break;
        };
        if out.len() + name.len() + 2 >= MAX_FIELD_LEN {
            break;
        }
        if !out.is_empty() {
            out.push(';');
        }
        out.push_str(name);
        pos += len;
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn parse_u16_list(data: &[u8]) -> Vec<u16> {
    if data.len() < 2 {
        return Vec::new();
    }
    let list_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    let end = data.len().min(2 + list_len);
    data[2..end]
        .chunks_exact(2)
        .map(|p| u16::from_be_bytes([p[0], p[1]]))
        .filter(|&v| !is_grease_value(v))
        .collect()
}

fn parse_u8_list(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let list_len = data[0] as usize;
    let end = data.len().min(1 + list_len);
    data[1..end].to_vec()
}

/// The JA3 fingerprint string:
/// version,ciphers,extensions,curves,point formats.
fn ja3_string(
    version: u16,
    ciphers: &[u16],
    extensions: &[u16],
    curves: &[u16],
    formats: &[u8],
) -> String {
    fn join<T: ToString>(items: &[T]) -> String {
        items
            .iter()
            .map(T::to_string)
            .collect::<Vec<_>>()
            .join("-")
    }
    format!(
        "{},{},{},{},{}",
        version,
        join(ciphers),
        join(extensions),
        join(curves),
        join(formats)
    )
}

fn ja3_hash(ja3: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(ja3.as_bytes());
    hex::encode(hasher.finalize())
}

/// Process plugin extracting TLS handshake metadata.
#[derive(Debug, Clone, Default)]
pub struct TlsPlugin {
    /// ClientHellos with an extracted server name.
    parsed_sni: u64,
}

impl TlsPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parsed_sni(&self) -> u64 {
        self.parsed_sni
    }

    fn try_attach(&mut self, flow: &mut FlowRecord, pkt: &Packet) {
        let Some(summary) = parse_hello(&pkt.payload) else {
            return;
        };
        if !summary.client {
            return;
        }

        if summary.sni.is_some() {
            self.parsed_sni += 1;
        }
        let data = TlsData {
            version: summary.version,
            sni: summary.sni.unwrap_or_default(),
            alpn: String::new(),
            ja3: summary.ja3.map(|s| ja3_hash(&s)).unwrap_or_default(),
        };
        flow.add_extension(Extension::Tls(data));
    }
}

impl ProcessPlugin for TlsPlugin {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn ext_id(&self) -> ExtensionId {
        EXT_TLS
    }

    fn post_create(&mut self, flow: &mut FlowRecord, pkt: &Packet) -> PluginAction {
        self.try_attach(flow, pkt);
        PluginAction::OK
    }

    fn pre_update(&mut self, flow: &mut FlowRecord, pkt: &Packet) -> PluginAction {
        match flow.extension_mut(EXT_TLS) {
            Some(Extension::Tls(data)) => {
                // The server answer completes the record with the
                // negotiated protocol.
                if data.alpn.is_empty() {
                    if let Some(summary) = parse_hello(&pkt.payload) {
                        if let Some(alpn) = summary.alpn {
                            data.alpn = alpn;
                        }
                    }
                }
            }
            _ => self.try_attach(flow, pkt),
        }
        PluginAction::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ext(ext_type: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ext_type.to_be_bytes());
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn sni_ext(host: &str) -> Vec<u8> {
        let name = host.as_bytes();
        let mut body = Vec::new();
        body.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        body.push(0);
        body.extend_from_slice(&(name.len() as u16).to_be_bytes());
        body.extend_from_slice(name);
        ext(EXT_SERVER_NAME, &body)
    }

    fn record(hs_type: u8, body: &[u8]) -> Vec<u8> {
        let mut hs = vec![hs_type];
        hs.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..4]);
        hs.extend_from_slice(body);

        let mut rec = vec![REC_HANDSHAKE, 3, 1];
        rec.extend_from_slice(&(hs.len() as u16).to_be_bytes());
        rec.extend_from_slice(&hs);
        rec
    }

    fn client_hello(host: &str, ciphers: &[u16], extra_exts: &[Vec<u8>]) -> Vec<u8> {
        let mut exts = sni_ext(host);
        for e in extra_exts {
            exts.extend_from_slice(e);
        }

        let mut body = vec![3, 3];
        body.extend_from_slice(&[0u8; 32]);
        body.push(0); // session id
        body.extend_from_slice(&((ciphers.len() * 2) as u16).to_be_bytes());
        for c in ciphers {
            body.extend_from_slice(&c.to_be_bytes());
        }
        body.push(1);
        body.push(0); // null compression
        body.extend_from_slice(&(exts.len() as u16).to_be_bytes());
        body.extend_from_slice(&exts);

        record(HS_CLIENT_HELLO, &body)
    }

    fn server_hello(alpn: &[&str]) -> Vec<u8> {
        let mut list = Vec::new();
        for name in alpn {
            list.push(name.len() as u8);
            list.extend_from_slice(name.as_bytes());
        }
        let mut alpn_body = Vec::new();
        alpn_body.extend_from_slice(&(list.len() as u16).to_be_bytes());
        alpn_body.extend_from_slice(&list);
        let exts = ext(EXT_ALPN, &alpn_body);

        let mut body = vec![3, 3];
        body.extend_from_slice(&[0u8; 32]);
        body.push(0); // session id
        body.extend_from_slice(&[0x13, 0x01]); // chosen cipher
        body.push(0); // compression
        body.extend_from_slice(&(exts.len() as u16).to_be_bytes());
        body.extend_from_slice(&exts);

        record(HS_SERVER_HELLO, &body)
    }

    fn tcp_pkt(payload: Vec<u8>, source: bool) -> Packet {
        Packet {
            ip_proto: 6,
            src_port: 40000,
            dst_port: 443,
            payload: Bytes::from(payload),
            source_pkt: source,
            ..Default::default()
        }
    }

    fn data_of(flow: &FlowRecord) -> TlsData {
        match flow.extension(EXT_TLS) {
            Some(Extension::Tls(d)) => d.clone(),
            _ => panic!("tls extension missing"),
        }
    }

    #[test]
    fn test_client_hello_sni_and_version() {
        let mut plugin = TlsPlugin::new();
        let mut flow = FlowRecord::empty();
        let pkt = tcp_pkt(client_hello("example.org", &[0x1301, 0x1302], &[]), true);

        plugin.post_create(&mut flow, &pkt);
        let data = data_of(&flow);
        assert_eq!(data.sni, "example.org");
        assert_eq!(data.version, 0x0303);
        assert_eq!(plugin.parsed_sni(), 1);
    }

    #[test]
    fn test_ja3_string_shape() {
        let s = ja3_string(771, &[4865, 4866], &[0, 10, 11], &[29, 23], &[0]);
        assert_eq!(s, "771,4865-4866,0-10-11,29-23,0");
    }

    #[test]
    fn test_ja3_hash_is_md5_hex() {
        let mut plugin = TlsPlugin::new();
        let mut flow = FlowRecord::empty();
        let pkt = tcp_pkt(client_hello("example.org", &[0x1301], &[]), true);

        plugin.post_create(&mut flow, &pkt);
        let data = data_of(&flow);
        assert_eq!(data.ja3.len(), 32);
        assert!(data.ja3.bytes().all(|b| b.is_ascii_hexdigit()));

        // Same hello yields the same fingerprint.
        let mut flow2 = FlowRecord::empty();
        plugin.post_create(&mut flow2, &pkt);
        assert_eq!(data.ja3, data_of(&flow2).ja3);

        // A different cipher list yields a different one.
        let mut flow3 = FlowRecord::empty();
        let pkt3 = tcp_pkt(client_hello("example.org", &[0x1303], &[]), true);
        plugin.post_create(&mut flow3, &pkt3);
        assert_ne!(data.ja3, data_of(&flow3).ja3);
    }

    #[test]
    fn test_grease_values_excluded() {
        // 0x0a0a is GREASE and must not change the fingerprint.
        let plain = client_hello("example.org", &[0x1301], &[]);
        let greased = client_hello("example.org", &[0x0a0a, 0x1301], &[]);

        let mut plugin = TlsPlugin::new();
        let mut f1 = FlowRecord::empty();
        let mut f2 = FlowRecord::empty();
        plugin.post_create(&mut f1, &tcp_pkt(plain, true));
        plugin.post_create(&mut f2, &tcp_pkt(greased, true));
        assert_eq!(data_of(&f1).ja3, data_of(&f2).ja3);
    }

    #[test]
    fn test_server_alpn_fills_existing_record() {
        let mut plugin = TlsPlugin::new();
        let mut flow = FlowRecord::empty();
        plugin.post_create(
            &mut flow,
            &tcp_pkt(client_hello("example.org", &[0x1301], &[]), true),
        );

        let mut reply = tcp_pkt(server_hello(&["h2", "http/1.1"]), false);
        reply.src_port = 443;
        reply.dst_port = 40000;
        plugin.pre_update(&mut flow, &reply);

        assert_eq!(data_of(&flow).alpn, "h2;http/1.1");
    }

    #[test]
    fn test_server_hello_alone_creates_no_record() {
        let mut plugin = TlsPlugin::new();
        let mut flow = FlowRecord::empty();
        plugin.post_create(&mut flow, &tcp_pkt(server_hello(&["h2"]), true));
        assert!(flow.extension(EXT_TLS).is_none());
    }

    #[test]
    fn test_non_tls_payload_ignored() {
        let mut plugin = TlsPlugin::new();
        let mut flow = FlowRecord::empty();
        plugin.post_create(&mut flow, &tcp_pkt(b"GET / HTTP/1.1\r\n".to_vec(), true));
        assert!(flow.extension(EXT_TLS).is_none());

        plugin.post_create(&mut flow, &tcp_pkt(Vec::new(), true));
        assert!(flow.extension(EXT_TLS).is_none());
    }

    #[test]
    fn test_truncated_hello_ignored() {
        let mut plugin = TlsPlugin::new();
        let mut flow = FlowRecord::empty();
        let mut payload = client_hello("example.org", &[0x1301], &[]);
        payload.truncate(20);
        plugin.post_create(&mut flow, &tcp_pkt(payload, true));
        assert!(flow.extension(EXT_TLS).is_none());
    }

    #[test]
    fn test_supported_groups_enter_fingerprint() {
        let mut groups = Vec::new();
        groups.extend_from_slice(&4u16.to_be_bytes());
        groups.extend_from_slice(&29u16.to_be_bytes());
        groups.extend_from_slice(&23u16.to_be_bytes());
        let with_groups = client_hello(
            "example.org",
            &[0x1301],
            &[ext(EXT_SUPPORTED_GROUPS, &groups)],
        );
        let without = client_hello("example.org", &[0x1301], &[]);

        let mut plugin = TlsPlugin::new();
        let mut f1 = FlowRecord::empty();
        let mut f2 = FlowRecord::empty();
        plugin.post_create(&mut f1, &tcp_pkt(with_groups, true));
        plugin.post_create(&mut f2, &tcp_pkt(without, true));
        assert_ne!(data_of(&f1).ja3, data_of(&f2).ja3);
    }
}
