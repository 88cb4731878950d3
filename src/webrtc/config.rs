//! ICE server configuration

use webrtc::ice_transport::ice_server::RTCIceServer;

/// One [`RTCIceServer`] per configured URL
///
/// Blank entries are skipped. Credentials are not supported, STUN only.
pub fn ice_servers(urls: &[String]) -> Vec<RTCIceServer> {
    urls.iter()
        .map(|url| url.trim())
        .filter(|url| !url.is_empty())
        .map(|url| RTCIceServer {
            urls: vec![url.to_string()],
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_servers() {
        let urls = vec![
            "stun:stun.l.google.com:19302".to_string(),
            "  ".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
        ];
        let servers = ice_servers(&urls);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].urls, vec!["stun:stun1.l.google.com:19302"]);
        assert!(servers[0].username.is_empty());
    }
}
