use super::*;
use std::collections::HashMap;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn server_defaults_when_unset() {
    let config = ServerConfig::from_lookup(lookup(&[]));
    assert_eq!(config, ServerConfig::default());
    assert_eq!(config.endpoint, "/");
    assert!(!config.reject_orphan_posts);
}

#[test]
fn server_endpoint_gets_leading_slash() {
    let config = ServerConfig::from_lookup(lookup(&[("BIHTTP_ENDPOINT", "bihttp")]));
    assert_eq!(config.endpoint, "/bihttp");

    let config = ServerConfig::from_lookup(lookup(&[("BIHTTP_ENDPOINT", "/duplex")]));
    assert_eq!(config.endpoint, "/duplex");
}

#[test]
fn server_blank_endpoint_falls_back_to_default() {
    let config = ServerConfig::from_lookup(lookup(&[("BIHTTP_ENDPOINT", "  ")]));
    assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
}

#[test]
fn server_orphan_flag_accepts_common_truthy_values() {
    for raw in ["1", "true", "TRUE", "yes", "on"] {
        let config = ServerConfig::from_lookup(lookup(&[("BIHTTP_REJECT_ORPHAN_POSTS", raw)]));
        assert!(config.reject_orphan_posts, "{raw} should enable the flag");
    }
    let config = ServerConfig::from_lookup(lookup(&[("BIHTTP_REJECT_ORPHAN_POSTS", "no")]));
    assert!(!config.reject_orphan_posts);
}

#[test]
fn client_connect_timeout_parses_seconds() {
    let config = ClientConfig::from_lookup(lookup(&[("BIHTTP_CONNECT_TIMEOUT_SECS", "3")]));
    assert_eq!(config.connect_timeout, Duration::from_secs(3));
}

#[test]
fn client_invalid_timeout_uses_default() {
    let config = ClientConfig::from_lookup(lookup(&[("BIHTTP_CONNECT_TIMEOUT_SECS", "soon")]));
    assert_eq!(config, ClientConfig::default());
}
