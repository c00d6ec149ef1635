//! Flow key derivation and hashing.
//!
//! The canonical flow identifier is the five-tuple packed into a
//! byte-exact layout and hashed with XXH64. The layout length depends on
//! the IP version: the short form for v4, the full form for v6, so v4
//! keys never hash the unused address tail.

use std::hash::Hasher;
use std::net::IpAddr;

use twox_hash::XxHash64;

use crate::packet::Packet;

/// Packed key length for IPv4 (ports + proto + version + 2x4B addresses).
pub const KEY_V4_LEN: usize = 14;
/// Packed key length for IPv6 (ports + proto + version + 2x16B addresses).
pub const KEY_V6_LEN: usize = 38;

/// A flow key prepared from one packet.
///
/// Holds the packed five-tuple, its hash, and whether the tuple was
/// swapped (inverse lookup for bi-flow matching). Prepared once per
/// packet and reused for every store call handling that packet.
#[derive(Debug, Clone, Copy)]
pub struct FlowKey {
    packed: [u8; KEY_V6_LEN],
    len: usize,
    hash: u64,
    inverse: bool,
    ip_version: u8,
}

impl FlowKey {
    /// Pack the five-tuple of `pkt`, swapped when `inverse` is set.
    ///
    /// Returns `None` for packets that cannot form a key (mixed v4/v6
    /// address pair); such packets are dropped at the cache boundary.
    pub fn from_packet(pkt: &Packet, inverse: bool) -> Option<Self> {
        let (src_ip, dst_ip, src_port, dst_port) = if inverse {
            (pkt.dst_ip, pkt.src_ip, pkt.dst_port, pkt.src_port)
        } else {
            (pkt.src_ip, pkt.dst_ip, pkt.src_port, pkt.dst_port)
        };

        let mut packed = [0u8; KEY_V6_LEN];
        packed[0..2].copy_from_slice(&src_port.to_le_bytes());
        packed[2..4].copy_from_slice(&dst_port.to_le_bytes());
        packed[4] = pkt.ip_proto;

        let len = match (src_ip, dst_ip) {
            (IpAddr::V4(s), IpAddr::V4(d)) => {
                packed[5] = 4;
                packed[6..10].copy_from_slice(&s.octets());
                packed[10..14].copy_from_slice(&d.octets());
                KEY_V4_LEN
            }
            (IpAddr::V6(s), IpAddr::V6(d)) => {
                packed[5] = 6;
                packed[6..22].copy_from_slice(&s.octets());
                packed[22..38].copy_from_slice(&d.octets());
                KEY_V6_LEN
            }
            _ => return None,
        };

        Some(Self {
            packed,
            len,
            hash: hash_key(&packed[..len]),
            inverse,
            ip_version: packed[5],
        })
    }

    /// The key hash. Never zero; zero is reserved for empty slots.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Whether this key was prepared with the tuple swapped.
    pub fn is_inverse(&self) -> bool {
        self.inverse
    }

    /// IP version of the keyed flow (4 or 6).
    pub fn ip_version(&self) -> u8 {
        self.ip_version
    }
}

/// XXH64 over the packed key bytes.
///
/// A zero digest is remapped by forcing the low bit: zero marks an empty
/// cache slot, so no live key may hash to it.
fn hash_key(packed: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(packed);
    let h = hasher.finish();
    if h == 0 {
        1
    } else {
        h
    }
}
