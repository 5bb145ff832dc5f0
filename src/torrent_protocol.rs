pub mod bitfield;
pub mod handshake;
pub mod wire_protocol;
