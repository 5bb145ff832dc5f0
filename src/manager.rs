pub mod peer_connection;
pub mod piece_download;
#[cfg(test)]
pub mod test_peer;
pub mod torrent_manager;
