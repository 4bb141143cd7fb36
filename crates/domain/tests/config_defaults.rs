use rae_domain::config::Config;

#[test]
fn default_host_is_bind_all() {
    let config = Config::default();
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
fn explicit_host_and_port_parse() {
    let toml_str = r#"
[server]
host = "127.0.0.1"
http_port = 3210
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.http_port, 3210);
}

#[test]
fn webhook_retry_schedule_has_four_default_delays() {
    let config = Config::default();
    assert_eq!(config.webhook.retry_delays_secs, vec![1, 5, 30, 300]);
    assert_eq!(config.webhook.max_attempts, 5);
}
