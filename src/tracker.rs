use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::{str, time::Duration};

use anyhow::{bail, Result};
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use reqwest::{ClientBuilder, Url};

use crate::bencoding::Value;

const COMPACT: i32 = 1;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// asks an http tracker for the peers of the torrent, announcing that nothing has been downloaded
// yet
pub async fn request_peers(
    announce: &str,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    listening_port: u16,
    left: u64,
) -> Result<Vec<SocketAddr>> {
    let url = build_tracker_url(announce, info_hash, peer_id, listening_port, left)?;
    log::debug!("requesting url: {}", url);

    let body = ClientBuilder::new()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()?
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    parse_tracker_response(&body)
}

pub fn build_tracker_url(
    announce: &str,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    listening_port: u16,
    left: u64,
) -> Result<Url> {
    if !announce.starts_with("http") {
        bail!("scheme of tracker url not supported: {}", announce);
    }
    let mut url = Url::parse_with_params(
        announce,
        &[
            ("port", listening_port.to_string()),
            ("uploaded", "0".to_string()),
            ("downloaded", "0".to_string()),
            ("left", left.to_string()),
            ("compact", COMPACT.to_string()),
        ],
    )?;

    // binary values: they must be percent-encoded byte by byte, not as utf-8 text
    let query = format!(
        "info_hash={}&peer_id={}&{}",
        percent_encode(&info_hash, NON_ALPHANUMERIC),
        percent_encode(&peer_id, NON_ALPHANUMERIC),
        url.query().unwrap_or_default()
    );
    url.set_query(Some(&query));
    Ok(url)
}

pub fn parse_tracker_response(body: &[u8]) -> Result<Vec<SocketAddr>> {
    let response_map = match Value::new(body) {
        Value::Dict(m, _, _) => m,
        _ => bail!("The tracker response was not a valid bencoded map"),
    };

    if let Some(Value::Str(failure_reason_vec)) = response_map.get(&b"failure reason".to_vec()) {
        bail!(
            "tracker responded with failure: {}",
            String::from_utf8_lossy(failure_reason_vec)
        );
    }

    if let Some(Value::Str(warning_message_vec)) = response_map.get(&b"warning message".to_vec()) {
        log::warn!(
            "tracker warning: {}",
            String::from_utf8_lossy(warning_message_vec)
        );
    }
    if let Some(Value::Int(interval)) = response_map.get(&b"interval".to_vec()) {
        log::debug!("tracker interval: {interval}s");
    }

    match response_map.get(&b"peers".to_vec()) {
        Some(Value::Str(peers_bytes)) => get_peers_with_binary_model(peers_bytes),
        Some(Value::List(peers_list)) => get_peers_with_dict_model(peers_list),
        _ => bail!(
            "Peers key not provided in bencoded dict or provided but it was not a list or string"
        ),
    }
}

fn get_peers_with_dict_model(peers_values: &[Value]) -> Result<Vec<SocketAddr>> {
    let mut peers_list = Vec::new();
    for v in peers_values {
        let Value::Dict(peer_dict, _, _) = v else {
            bail!("Peers list contains a value that is not a dict");
        };

        let ip = match peer_dict.get(&b"ip".to_vec()) {
            Some(Value::Str(ip_vec)) => match str::from_utf8(ip_vec) {
                Ok(i) => i.to_string(),
                _ => bail!("Ip key provided in list of peers but it is not an UTF8 string"),
            },
            _ => bail!("Ip key not provided in list of peers or provided but it is not a string"),
        };

        let port = match peer_dict.get(&b"port".to_vec()) {
            Some(Value::Int(port)) => u16::try_from(*port)?,
            _ => bail!("Port key not provided in list of peers or provided but it is not a number"),
        };

        match ip.parse::<IpAddr>() {
            Ok(ip) => peers_list.push(SocketAddr::new(ip, port)),
            Err(_) => log::debug!("skipping peer with a host name instead of an ip: {ip}"),
        }
    }
    Ok(peers_list)
}

fn get_peers_with_binary_model(peers_bytes: &[u8]) -> Result<Vec<SocketAddr>> {
    if peers_bytes.len() % 6 != 0 {
        bail!("Peers list is provided in binary model but it is not aligned to 6 bytes");
    }
    Ok(peers_bytes
        .chunks_exact(6)
        .map(|peer| {
            let ip = Ipv4Addr::new(peer[0], peer[1], peer[2], peer[3]);
            let port = u16::from_be_bytes([peer[4], peer[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect())
}
