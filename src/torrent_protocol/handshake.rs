use anyhow::Result;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::torrent_protocol::wire_protocol::ProtocolError;
use crate::util::{force_string, pretty_info_hash};

pub const PROTOCOL_STRING: &str = "BitTorrent protocol";

// <pstrlen: 1 byte><pstr><reserved: 8 bytes><info hash: 20 bytes><peer id: 20 bytes>
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Handshake {
    pub pstr: String,
    pub reserved: [u8; 8], // we do not support any extension, zero in Handshake::new
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl std::fmt::Display for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "protocol: {}, info_hash: {}, peer_id: {}, reserved: {:?}",
            self.pstr,
            pretty_info_hash(self.info_hash),
            force_string(&self.peer_id),
            self.reserved
        )
    }
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake {
            pstr: PROTOCOL_STRING.to_string(),
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ProtocolError> {
        let pstr = self.pstr.as_bytes();
        let pstr_len = u8::try_from(pstr.len())
            .map_err(|_| ProtocolError::ProtocolStringTooLong(pstr.len()))?;
        let mut buf = Vec::with_capacity(1 + pstr.len() + 48);
        buf.push(pstr_len);
        buf.extend_from_slice(pstr);
        buf.extend_from_slice(&self.reserved);
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);
        Ok(buf)
    }

    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Handshake> {
        let mut pstr_len_buf: [u8; 1] = [0; 1];
        reader.read_exact(&mut pstr_len_buf).await?;
        let pstr_len = pstr_len_buf[0] as usize;
        if pstr_len == 0 {
            return Err(ProtocolError::EmptyProtocolString.into());
        }

        let mut buf = vec![0; pstr_len + 48];
        reader.read_exact(&mut buf).await?;

        let mut reserved: [u8; 8] = [0; 8];
        reserved.copy_from_slice(&buf[pstr_len..pstr_len + 8]);
        let mut info_hash: [u8; 20] = [0; 20];
        info_hash.copy_from_slice(&buf[pstr_len + 8..pstr_len + 28]);
        let mut peer_id: [u8; 20] = [0; 20];
        peer_id.copy_from_slice(&buf[pstr_len + 28..]);

        Ok(Handshake {
            pstr: String::from_utf8_lossy(&buf[..pstr_len]).to_string(),
            reserved,
            info_hash,
            peer_id,
        })
    }
}
