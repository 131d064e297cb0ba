//! Checksums de bloques y su registro al final del archivo.

use std::convert::TryInto;

pub const TRAILER_MAGIC: &[u8; 4] = b"MDB1";
pub const TRAILER_LEN: usize = 16;

pub fn crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Checksum incremental para escrituras en streaming.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamingChecksum {
    crc: u32,
    len: u64,
}

impl StreamingChecksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.crc = crc32c::crc32c_append(self.crc, data);
        self.len += data.len() as u64;
    }

    pub fn trailer(&self) -> Trailer {
        Trailer {
            crc32c: self.crc,
            length: self.len,
        }
    }
}

/// Registro de checksum que va detrás del payload:
/// magic (4) | crc32c LE (4) | longitud LE (8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub crc32c: u32,
    pub length: u64,
}

impl Trailer {
    pub fn for_payload(data: &[u8]) -> Self {
        Self {
            crc32c: crc32c(data),
            length: data.len() as u64,
        }
    }

    pub fn encode(&self) -> [u8; TRAILER_LEN] {
        let mut out = [0u8; TRAILER_LEN];
        out[..4].copy_from_slice(TRAILER_MAGIC);
        out[4..8].copy_from_slice(&self.crc32c.to_le_bytes());
        out[8..].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() != TRAILER_LEN || &raw[..4] != TRAILER_MAGIC {
            return None;
        }
        let crc32c = u32::from_le_bytes(raw[4..8].try_into().ok()?);
        let length = u64::from_le_bytes(raw[8..].try_into().ok()?);
        Some(Self { crc32c, length })
    }

    pub fn verify(&self, payload: &[u8]) -> bool {
        payload.len() as u64 == self.length && crc32c(payload) == self.crc32c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailer_detects_flipped_byte() {
        let mut data = b"hello,hadoop\nhello,hdfs".to_vec();
        let trailer = Trailer::for_payload(&data);
        assert!(trailer.verify(&data));

        data[3] ^= 0xff;
        assert!(!trailer.verify(&data));
    }

    #[test]
    fn trailer_decode_rejects_bad_magic() {
        let mut raw = Trailer::for_payload(b"abc").encode();
        assert!(Trailer::decode(&raw).is_some());
        raw[0] = b'X';
        assert!(Trailer::decode(&raw).is_none());
        assert!(Trailer::decode(&raw[..10]).is_none());
    }

    #[test]
    fn streaming_matches_one_shot() {
        let mut s = StreamingChecksum::new();
        s.update(b"hello,");
        s.update(b"hadoop");
        assert_eq!(s.trailer(), Trailer::for_payload(b"hello,hadoop"));
    }
}
