//! Directory-listing record codec.
//!
//! A `DirectoryListing` payload is a run of records, each:
//! null-terminated ASCII relative path, 16 raw digest bytes, 8-byte
//! little-endian file size. The run ends when the payload is exhausted.

use shoal_types::digest::{Digest, DIGEST_LEN};

use crate::message::WireMessage;

/// One file described by a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingEntry {
    pub relative_path: String,
    pub digest: Digest,
    pub size: u64,
}

/// Serialize listing entries into a `DirectoryListing` payload body.
pub fn encode_entries<'a, I>(entries: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a ListingEntry>,
{
    let mut buf = Vec::new();
    for entry in entries {
        buf.extend_from_slice(entry.relative_path.as_bytes());
        buf.push(0);
        buf.extend_from_slice(entry.digest.as_bytes());
        buf.extend_from_slice(&entry.size.to_le_bytes());
    }
    buf
}

/// Parse the next record from the message cursor.
///
/// Returns `None` when the payload is exhausted or the record is truncated;
/// a truncated tail is dropped rather than reported, per the protocol's
/// discard-malformed policy.
pub fn read_entry(msg: &mut WireMessage) -> Option<ListingEntry> {
    if msg.remaining() == 0 {
        return None;
    }
    let relative_path = msg.read_null_terminated_string();
    let digest = Digest::from_slice(msg.read_bytes(DIGEST_LEN))?;
    let size_bytes: [u8; 8] = msg.read_bytes(8).try_into().ok()?;
    Some(ListingEntry {
        relative_path,
        digest,
        size: u64::from_le_bytes(size_bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageKind, Opcode, HEADER_LEN};
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn entry(path: &str, digest: [u8; DIGEST_LEN], size: u64) -> ListingEntry {
        ListingEntry {
            relative_path: path.to_string(),
            digest: Digest::new(digest),
            size,
        }
    }

    #[test]
    fn single_entry_layout() {
        let body = encode_entries([&entry("a.txt", [0u8; DIGEST_LEN], 1024)]);
        let mut expected = b"a.txt\0".to_vec();
        expected.extend_from_slice(&[0u8; DIGEST_LEN]);
        expected.extend_from_slice(&[0x00, 0x04, 0, 0, 0, 0, 0, 0]);
        assert_eq!(body, expected);
    }

    #[test]
    fn listing_roundtrip() {
        let sent = vec![
            entry("a.txt", [0u8; DIGEST_LEN], 1024),
            entry("music/b.ogg", [7u8; DIGEST_LEN], u64::MAX),
            entry("empty", [0xff; DIGEST_LEN], 0),
        ];
        let out = WireMessage::create_outgoing(
            MessageKind::Direct,
            addr(),
            Opcode::DirectoryListing,
            &encode_entries(&sent),
        );
        // Strip the Direct length prefix the way the multiplexer does.
        let mut inc =
            WireMessage::incoming(MessageKind::Direct, addr(), out.payload()[4..].to_vec());
        assert!(inc.has_valid_header());
        assert_eq!(inc.opcode(), Opcode::DirectoryListing);
        inc.skip(HEADER_LEN);

        let mut parsed = Vec::new();
        while let Some(e) = read_entry(&mut inc) {
            parsed.push(e);
        }
        assert_eq!(parsed, sent);
        assert_eq!(inc.remaining(), 0);
    }

    #[test]
    fn truncated_record_is_dropped() {
        let mut body = encode_entries([&entry("keep.txt", [1u8; DIGEST_LEN], 9)]);
        // A second record cut off inside its digest.
        body.extend_from_slice(b"cut.txt\0");
        body.extend_from_slice(&[2u8; 5]);
        let mut msg = WireMessage::incoming(MessageKind::Direct, addr(), body);

        let first = read_entry(&mut msg).expect("intact record parses");
        assert_eq!(first.relative_path, "keep.txt");
        assert!(read_entry(&mut msg).is_none());
    }

    #[test]
    fn empty_payload_yields_no_entries() {
        let mut msg = WireMessage::incoming(MessageKind::Direct, addr(), Vec::new());
        assert!(read_entry(&mut msg).is_none());
    }
}
