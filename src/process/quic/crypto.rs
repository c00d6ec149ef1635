//! Initial-packet cryptography: salt selection, HKDF key schedule,
//! header protection mask, and AEAD payload decryption.
//!
//! Keys are derived per direction from the connection id carried by the
//! packet itself (RFC 9001 §5.2), so a passive observer can decrypt
//! Initial packets without any handshake state.

use ring::aead::{quic, Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM};
use ring::hkdf::{KeyType, Prk, Salt, HKDF_SHA256};

use crate::error::QuicError;

pub const SALT_LEN: usize = 20;
pub const SAMPLE_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

const AES_128_KEY_LEN: usize = 16;
const AEAD_NONCE_LEN: usize = 12;
const SECRET_LEN: usize = 32;

const SALT_DRAFT_22: [u8; SALT_LEN] = [
    0x7f, 0xbc, 0xdb, 0x0e, 0x7c, 0x66, 0xbb, 0xe9, 0x19, 0x3a, 0x96, 0xcd, 0x21, 0x51, 0x9e,
    0xbd, 0x7a, 0x02, 0x64, 0x4a,
];
const SALT_DRAFT_23: [u8; SALT_LEN] = [
    0xc3, 0xee, 0xf7, 0x12, 0xc7, 0x2e, 0xbb, 0x5a, 0x11, 0xa7, 0xd2, 0x43, 0x2b, 0xb4, 0x63,
    0x65, 0xbe, 0xf9, 0xf5, 0x02,
];
const SALT_DRAFT_29: [u8; SALT_LEN] = [
    0xaf, 0xbf, 0xec, 0x28, 0x99, 0x93, 0xd2, 0x4c, 0x9e, 0x97, 0x86, 0xf1, 0x9c, 0x61, 0x11,
    0xe0, 0x43, 0x90, 0xa8, 0x99,
];
const SALT_V1: [u8; SALT_LEN] = [
    0x38, 0x76, 0x2c, 0xf7, 0xf5, 0x59, 0x34, 0xb3, 0x4d, 0x17, 0x9a, 0xe6, 0xa4, 0xc8, 0x0c,
    0xad, 0xcc, 0xbb, 0x7f, 0x0a,
];
const SALT_Q050: [u8; SALT_LEN] = [
    0x50, 0x45, 0x74, 0xef, 0xd0, 0x66, 0xfe, 0x2f, 0x9d, 0x94, 0x5c, 0xfc, 0xdb, 0xd3, 0xa7,
    0xf0, 0xd3, 0xb5, 0x6b, 0x45,
];
const SALT_T050: [u8; SALT_LEN] = [
    0x7f, 0xf5, 0x79, 0xe5, 0xac, 0xd0, 0x72, 0x91, 0x55, 0x80, 0x30, 0x4c, 0x43, 0xa2, 0x36,
    0x7c, 0x60, 0x48, 0x83, 0x10,
];
const SALT_T051: [u8; SALT_LEN] = [
    0x7a, 0x4e, 0xde, 0xf4, 0xe7, 0xcc, 0xee, 0x5f, 0xa4, 0x50, 0x6c, 0x19, 0x12, 0x4f, 0xc8,
    0xcc, 0xda, 0x6e, 0x03, 0x3d,
];

/// Which end of the conversation the packet protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Client-sent Initial; keyed by the destination connection id.
    ClientIn,
    /// Server-sent Initial; keyed by the source connection id.
    ServerIn,
}

impl Side {
    fn label(self) -> &'static [u8] {
        match self {
            Side::ClientIn => b"client in",
            Side::ServerIn => b"server in",
        }
    }
}

/// Initial AEAD material for one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialKeys {
    pub key: [u8; AES_128_KEY_LEN],
    pub iv: [u8; AEAD_NONCE_LEN],
    pub hp: [u8; AES_128_KEY_LEN],
}

/// Map a wire version to its draft number; zero means unknown.
pub fn draft_version(version: u32) -> u8 {
    if version >> 8 == 0x00ff_0000 {
        return version as u8;
    }
    match version {
        0xface_b001 => 22,
        0xface_b002 | 0xface_b00e | 0x5130_3530 | 0x5430_3530 | 0x5430_3531 => 27,
        0x0a0a_0a0a => 29,
        0x0000_0001 => 33,
        _ => 0,
    }
}

fn version_at_most(version: u32, max_draft: u8) -> bool {
    let draft = draft_version(version);
    draft != 0 && draft <= max_draft
}

/// Choose the handshake salt for a version.
/// The second component marks the Google QUIC dialects, whose Initial
/// payload does not carry an IETF ClientHello.
pub fn select_salt(version: u32) -> (&'static [u8; SALT_LEN], bool) {
    match version {
        0x5130_3530 => (&SALT_Q050, true),
        0x5430_3530 => (&SALT_T050, true),
        0x5430_3531 => (&SALT_T051, true),
        v if version_at_most(v, 22) => (&SALT_DRAFT_22, false),
        v if version_at_most(v, 28) => (&SALT_DRAFT_23, false),
        v if version_at_most(v, 32) => (&SALT_DRAFT_29, false),
        _ => (&SALT_V1, false),
    }
}

struct ExpandLen(usize);

impl KeyType for ExpandLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-Expand-Label as defined in RFC 8446 §7.1.
///
/// HkdfLabel = uint16 length || opaque label<7..255> ("tls13 " + Label)
///             || opaque context<0..255> (empty here).
fn hkdf_expand_label(prk: &Prk, label: &[u8], out: &mut [u8]) -> Result<(), QuicError> {
    let info = encode_hkdf_label(label, out.len());
    let info_slices = [info.as_slice()];
    let okm = prk
        .expand(&info_slices, ExpandLen(out.len()))
        .map_err(|_| QuicError::KeyDerivation)?;
    okm.fill(out).map_err(|_| QuicError::KeyDerivation)
}

fn encode_hkdf_label(label: &[u8], out_len: usize) -> Vec<u8> {
    let mut info = Vec::with_capacity(2 + 1 + 6 + label.len() + 1);
    info.extend_from_slice(&(out_len as u16).to_be_bytes());
    info.push((6 + label.len()) as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label);
    info.push(0); // empty context
    info
}

/// Derive the Initial key, IV and header-protection key for one side.
///
/// `cid` is the destination connection id for [`Side::ClientIn`] and the
/// source connection id for [`Side::ServerIn`].
pub fn derive_initial_keys(version: u32, cid: &[u8], side: Side) -> Result<InitialKeys, QuicError> {
    let (salt, _) = select_salt(version);

    // initial_secret = HKDF-Extract(salt, connection id)
    let initial_secret = Salt::new(HKDF_SHA256, salt).extract(cid);

    // per-direction secret = HKDF-Expand-Label(initial_secret, side, "", 32)
    let mut secret = [0u8; SECRET_LEN];
    hkdf_expand_label(&initial_secret, side.label(), &mut secret)?;
    let secret_prk = Prk::new_less_safe(HKDF_SHA256, &secret);

    let mut keys = InitialKeys {
        key: [0; AES_128_KEY_LEN],
        iv: [0; AEAD_NONCE_LEN],
        hp: [0; AES_128_KEY_LEN],
    };
    hkdf_expand_label(&secret_prk, b"quic key", &mut keys.key)?;
    hkdf_expand_label(&secret_prk, b"quic iv", &mut keys.iv)?;
    hkdf_expand_label(&secret_prk, b"quic hp", &mut keys.hp)?;
    Ok(keys)
}

/// Compute the 5-byte header-protection mask:
/// AES-128-ECB(hp, sample) truncated to five bytes.
pub fn header_mask(hp: &[u8; AES_128_KEY_LEN], sample: &[u8]) -> Result<[u8; 5], QuicError> {
    let key =
        quic::HeaderProtectionKey::new(&quic::AES_128, hp).map_err(|_| QuicError::KeyDerivation)?;
    key.new_mask(sample).map_err(|_| QuicError::KeyDerivation)
}

/// Decrypt the Initial payload in place.
///
/// `ciphertext_and_tag` is the protected payload after the packet
/// number; `header` is the unprotected header (decrypted first byte and
/// packet number included) serving as associated data. The plaintext
/// lands in `out`.
pub fn decrypt_payload(
    keys: &InitialKeys,
    packet_number: u32,
    header: &[u8],
    ciphertext_and_tag: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), QuicError> {
    if ciphertext_and_tag.len() <= TAG_LEN {
        return Err(QuicError::Truncated {
            context: "aead payload",
        });
    }

    // Nonce: IV with its low 64 bits XOR-ed by the packet number.
    let mut nonce_bytes = keys.iv;
    let mut low = u64::from_be_bytes(nonce_bytes[4..12].try_into().unwrap());
    low ^= u64::from(packet_number);
    nonce_bytes[4..12].copy_from_slice(&low.to_be_bytes());

    let unbound =
        UnboundKey::new(&AES_128_GCM, &keys.key).map_err(|_| QuicError::KeyDerivation)?;
    let key = LessSafeKey::new(unbound);

    out.clear();
    out.extend_from_slice(ciphertext_and_tag);
    let plain_len = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::from(header),
            out,
        )
        .map_err(|_| QuicError::AuthenticationFailed)?
        .len();
    out.truncate(plain_len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    /// RFC 9001 Appendix A.1 test DCID.
    const TEST_DCID: [u8; 8] = [0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08];

    #[test]
    fn test_hkdf_label_encoding() {
        let info = encode_hkdf_label(b"client in", 32);
        let mut expected = vec![0x00, 0x20, 0x0f];
        expected.extend_from_slice(b"tls13 client in");
        expected.push(0x00);
        assert_eq!(info, expected);
    }

    #[test]
    fn test_rfc9001_client_initial_keys() {
        let keys = derive_initial_keys(0x0000_0001, &TEST_DCID, Side::ClientIn).unwrap();
        assert_eq!(keys.key.to_vec(), hex("1f369613dd76d5467730efcbe3b1a22d"));
        assert_eq!(keys.iv.to_vec(), hex("fa044b2f42a3fd3b46fb255c"));
        assert_eq!(keys.hp.to_vec(), hex("9f50449e04a0e810283a1e9933adedd2"));
    }

    #[test]
    fn test_rfc9001_server_initial_keys() {
        let keys = derive_initial_keys(0x0000_0001, &TEST_DCID, Side::ServerIn).unwrap();
        assert_eq!(keys.key.to_vec(), hex("cf3a5331653c364c88f0f379b6067e37"));
        assert_eq!(keys.iv.to_vec(), hex("0ac1493ca1905853b0bba03e"));
        assert_eq!(keys.hp.to_vec(), hex("c206b8d9b9f0f37644430b490eeaa314"));
    }

    #[test]
    fn test_draft_detection() {
        assert_eq!(draft_version(0xff00_001d), 29);
        assert_eq!(draft_version(0xff00_0016), 22);
        assert_eq!(draft_version(0xface_b001), 22);
        assert_eq!(draft_version(0xface_b002), 27);
        assert_eq!(draft_version(0x0000_0001), 33);
        assert_eq!(draft_version(0xdead_beef), 0);
    }

    #[test]
    fn test_salt_selection() {
        assert_eq!(select_salt(0x0000_0001), (&SALT_V1, false));
        assert_eq!(select_salt(0xff00_0016), (&SALT_DRAFT_22, false)); // draft-22
        assert_eq!(select_salt(0xff00_001b), (&SALT_DRAFT_23, false)); // draft-27
        assert_eq!(select_salt(0xff00_001d), (&SALT_DRAFT_29, false)); // draft-29
        assert_eq!(select_salt(0x5130_3530), (&SALT_Q050, true));
        assert_eq!(select_salt(0x5430_3530), (&SALT_T050, true));
        assert_eq!(select_salt(0x5430_3531), (&SALT_T051, true));
        // Unknown versions fall through to the v1 salt.
        assert_eq!(select_salt(0xdead_beef), (&SALT_V1, false));
    }

    #[test]
    fn test_payload_round_trip() {
        let keys = derive_initial_keys(0x0000_0001, &TEST_DCID, Side::ClientIn).unwrap();
        let header = hex("c300000001088394c8f03e5157080000449e00000002");
        let plaintext = b"frame bytes under protection".to_vec();

        // Seal with the same schedule the decryptor derives.
        let mut nonce = keys.iv;
        let mut low = u64::from_be_bytes(nonce[4..12].try_into().unwrap());
        low ^= 2;
        nonce[4..12].copy_from_slice(&low.to_be_bytes());

        let sealing =
            LessSafeKey::new(UnboundKey::new(&AES_128_GCM, &keys.key).unwrap());
        let mut sealed = plaintext.clone();
        sealing
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::from(header.as_slice()),
                &mut sealed,
            )
            .unwrap();

        let mut out = Vec::new();
        decrypt_payload(&keys, 2, &header, &sealed, &mut out).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_corrupted_tag_rejected() {
        let keys = derive_initial_keys(0x0000_0001, &TEST_DCID, Side::ClientIn).unwrap();
        let header = [0xc3u8; 20];
        let mut sealed = vec![0u8; 48];
        sealed[47] ^= 0xff;

        let mut out = Vec::new();
        assert_eq!(
            decrypt_payload(&keys, 0, &header, &sealed, &mut out),
            Err(QuicError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_mask_is_deterministic() {
        let hp: [u8; 16] = hex("9f50449e04a0e810283a1e9933adedd2").try_into().unwrap();
        let sample = [0x11u8; SAMPLE_LEN];
        let a = header_mask(&hp, &sample).unwrap();
        let b = header_mask(&hp, &sample).unwrap();
        assert_eq!(a, b);

        let other = header_mask(&hp, &[0x22u8; SAMPLE_LEN]).unwrap();
        assert_ne!(a, other);
    }
}
