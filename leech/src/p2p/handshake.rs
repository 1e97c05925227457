use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use crate::ID;
use super::PeerError;

pub const PROTOCOL: [u8; 19] = *b"BitTorrent protocol";

// The handshake is a fixed 68 bytes both ways.
const HANDSHAKE_LEN: usize = 68;

pub struct Handshake {
    pub protocol: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: ID,
    pub peer_id: ID,
}

impl Handshake {
    pub fn new(info_hash: ID, peer_id: ID) -> Self {
        Self {
            protocol: PROTOCOL,
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {

    type Error = PeerError;

    fn encode(&mut self, handshake: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_u8(PROTOCOL.len() as u8);
        dst.extend_from_slice(&handshake.protocol);
        dst.extend_from_slice(&handshake.reserved);
        dst.extend_from_slice(&handshake.info_hash);
        dst.extend_from_slice(&handshake.peer_id);
        debug_assert_eq!(dst.len(), HANDSHAKE_LEN, "encoded handshake length is not 68 bytes");
        Ok(())
    }
}

impl Decoder for HandshakeCodec {

    type Item = Handshake;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        // The length prefix alone is enough to rule a peer out.
        match src.first() {
            None => return Ok(None),
            Some(&len) if len as usize != PROTOCOL.len() => {
                return Err(PeerError::IncorrectProtocol);
            }
            Some(_) => {}
        }
        if src.len() < HANDSHAKE_LEN {
            return Ok(None);
        }
        src.advance(1);

        let mut protocol = [0; 19];
        src.copy_to_slice(&mut protocol);

        let mut reserved = [0; 8];
        src.copy_to_slice(&mut reserved);

        let mut info_hash = [0; 20];
        src.copy_to_slice(&mut info_hash);

        let mut peer_id = [0; 20];
        src.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake { protocol, reserved, info_hash, peer_id }))
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("protocol", &String::from_utf8_lossy(&self.protocol))
            .field("reserved", &self.reserved)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("peer_id", &String::from_utf8_lossy(&self.peer_id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(info_hash: u8, peer_id: u8) -> BytesMut {
        let mut buf = BytesMut::new();
        HandshakeCodec
            .encode(Handshake::new([info_hash; 20], [peer_id; 20]), &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn round_trip() {
        let mut buf = encoded(0xaa, 0xbb);
        assert_eq!(buf.len(), HANDSHAKE_LEN);

        let handshake = HandshakeCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(handshake.protocol, PROTOCOL);
        assert_eq!(handshake.reserved, [0; 8]);
        assert_eq!(handshake.info_hash, [0xaa; 20]);
        assert_eq!(handshake.peer_id, [0xbb; 20]);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_input_waits() {
        let mut buf = BytesMut::new();
        buf.put_u8(19);
        buf.extend_from_slice(b"BitTorrent protocol");
        assert!(HandshakeCodec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn wrong_protocol_length_fails_fast() {
        let mut buf = BytesMut::new();
        buf.put_u8(20);
        buf.extend_from_slice(b"definitely not right");
        assert!(matches!(
            HandshakeCodec.decode(&mut buf),
            Err(PeerError::IncorrectProtocol),
        ));
    }

    #[test]
    fn trailing_bytes_are_left_for_the_message_codec() {
        let mut buf = encoded(1, 2);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        assert!(HandshakeCodec.decode(&mut buf).unwrap().is_some());
        assert_eq!(buf.len(), 4);
    }
}
