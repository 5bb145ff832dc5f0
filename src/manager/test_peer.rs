// simulated remote peers used by the manager tests

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::torrent_protocol::bitfield::Bitfield;
use crate::torrent_protocol::handshake::Handshake;
use crate::torrent_protocol::wire_protocol::{Message, MessageId};

pub const TEST_INFO_HASH: [u8; 20] = [7; 20];
pub const SIM_PEER_ID: [u8; 20] = *b"-SIM001-000000000000";
pub const SIM_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6881));

pub type Request = (u32, u32, u32);

pub async fn answer_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    info_hash: [u8; 20],
) -> Handshake {
    let theirs = Handshake::read(stream).await.unwrap();
    stream
        .write_all(&Handshake::new(info_hash, SIM_PEER_ID).serialize().unwrap())
        .await
        .unwrap();
    theirs
}

pub async fn send<S: AsyncWrite + Unpin>(stream: &mut S, message: Message) {
    stream.write_all(&message.serialize()).await.unwrap();
}

pub async fn recv<S: AsyncRead + Unpin>(stream: &mut S) -> Message {
    Message::read(stream).await.unwrap()
}

pub fn parse_request(message: &Message) -> Request {
    match message {
        Message::Frame {
            id: MessageId::Request,
            payload,
        } if payload.len() == 12 => (
            u32::from_be_bytes(payload[0..4].try_into().unwrap()),
            u32::from_be_bytes(payload[4..8].try_into().unwrap()),
            u32::from_be_bytes(payload[8..12].try_into().unwrap()),
        ),
        other => panic!("expected request, got {other}"),
    }
}

pub fn piece_message(index: u32, begin: u32, block: &[u8]) -> Message {
    let mut payload = Vec::with_capacity(8 + block.len());
    payload.extend_from_slice(&index.to_be_bytes());
    payload.extend_from_slice(&begin.to_be_bytes());
    payload.extend_from_slice(block);
    Message::with_payload(MessageId::Piece, payload)
}

// answers every request with the bytes in `pieces`, until the connection is closed
#[derive(Clone)]
pub struct SimulatedPeer {
    pub info_hash: [u8; 20],
    pub pieces: Vec<Vec<u8>>,
    pub has: Vec<bool>,
    pub delay: Duration, // before answering the handshake
    pub drop_after: Option<usize>, // closes the connection on that request, unanswered
}

impl SimulatedPeer {
    pub fn seeder(pieces: Vec<Vec<u8>>) -> Self {
        let has = vec![true; pieces.len()];
        SimulatedPeer {
            info_hash: TEST_INFO_HASH,
            pieces,
            has,
            delay: Duration::ZERO,
            drop_after: None,
        }
    }

    // returns every request received
    pub async fn serve<S: AsyncRead + AsyncWrite + Unpin>(self, mut stream: S) -> Vec<Request> {
        let mut requests = Vec::new();
        if Handshake::read(&mut stream).await.is_err() {
            return requests;
        }
        tokio::time::sleep(self.delay).await;
        let mut bitfield = Bitfield::new(self.has.len());
        for (index, has) in self.has.iter().enumerate() {
            if *has {
                bitfield.set_piece(index);
            }
        }
        let mut greeting = Handshake::new(self.info_hash, SIM_PEER_ID)
            .serialize()
            .unwrap();
        greeting.extend(
            Message::with_payload(MessageId::Bitfield, bitfield.as_bytes().to_vec()).serialize(),
        );
        greeting.extend(Message::new(MessageId::Unchoke).serialize());
        if stream.write_all(&greeting).await.is_err() {
            return requests;
        }

        loop {
            let message = match Message::read(&mut stream).await {
                Ok(message) => message,
                Err(_) => return requests,
            };
            if message.id() != Some(MessageId::Request) {
                continue;
            }
            let (index, begin, length) = parse_request(&message);
            requests.push((index, begin, length));
            if self.drop_after == Some(requests.len()) {
                return requests;
            }
            let block = self
                .pieces
                .get(index as usize)
                .and_then(|piece| piece.get(begin as usize..(begin + length) as usize));
            if let Some(block) = block {
                let reply = piece_message(index, begin, block).serialize();
                if stream.write_all(&reply).await.is_err() {
                    return requests;
                }
            }
        }
    }

    // accepts a single connection on an ephemeral local port
    pub async fn listen(self) -> (SocketAddr, JoinHandle<Vec<Request>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            self.serve(stream).await
        });
        (addr, handle)
    }
}
