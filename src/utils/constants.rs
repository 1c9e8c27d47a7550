/// Constants for homedash

/// Header carrying the API key; `Authorization: Bearer` is accepted too
pub const API_KEY_HEADER: &str = "x-api-key";

/// Well-known ports for display
pub fn get_port_description(port: u16) -> &'static str {
    match port {
        22 => "SSH",
        53 => "DNS",
        80 => "HTTP",
        443 => "HTTPS",
        1883 => "MQTT",
        3000 => "Grafana",
        8080 => "HTTP (alt)",
        8096 => "Jellyfin",
        8123 => "Home Assistant",
        9000 => "Portainer",
        9090 => "Prometheus",
        32400 => "Plex",
        _ => "",
    }
}
