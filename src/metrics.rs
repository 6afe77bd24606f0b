use lazy_static::lazy_static;
use log::error;
use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use warp::{Rejection, Reply};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    pub static ref NUM_CONNECTED_CLIENTS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("num_connected_clients", "Connected Clients"),
        &["hashed_ip"]
    )
    .expect("metric can be created");
    pub static ref NUM_SESSION_DOCUMENTS: IntGauge =
        IntGauge::new("num_session_documents", "Session Documents").expect("metric can be created");
    pub static ref NUM_ACTIVE_SUBSCRIPTIONS: IntGauge =
        IntGauge::new("num_active_subscriptions", "Active Subscriptions")
            .expect("metric can be created");
    pub static ref PRESENCE_WRITES: IntCounterVec = IntCounterVec::new(
        Opts::new("presence_writes", "Presence Writes"),
        &["outcome"]
    )
    .expect("metric can be created");
    pub static ref CONNECTION_DURATION_SEC: Histogram = Histogram::with_opts(
        HistogramOpts::new("connection_duration_sec", "Connection Duration Seconds").buckets(vec![
            1.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 40.0, 50.0, 60.0, 90.0, 120.0, 180.0, 240.0,
            300.0, 600.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0, 28800.0, 43200.0, 86400.0,
        ])
    )
    .expect("metric can be created");
}

pub(crate) fn register() {
    REGISTRY
        .register(Box::new(NUM_CONNECTED_CLIENTS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(NUM_SESSION_DOCUMENTS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(NUM_ACTIVE_SUBSCRIPTIONS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(PRESENCE_WRITES.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(CONNECTION_DURATION_SEC.clone()))
        .expect("collector can be registered");
}

pub(crate) async fn metrics_handler() -> Result<impl Reply, Rejection> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode presence metrics: {}", e);
    };
    let mut res = String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("presence metrics could not be from_utf8'd: {}", e);
        String::default()
    });

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("could not encode prometheus metrics: {}", e);
    };
    let res_default = String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("prometheus metrics could not be from_utf8'd: {}", e);
        String::default()
    });

    res.push_str(&res_default);
    Ok(res)
}

pub fn hash_ip(ip: std::net::IpAddr, salt: &str) -> Result<String, argon2::password_hash::Error> {
    use argon2::{
        password_hash::{PasswordHasher, SaltString},
        Argon2,
    };
    Argon2::default()
        .hash_password(ip.to_string().as_bytes(), &SaltString::from_b64(salt)?)?
        .hash
        .map(|hash| hash.to_string())
        .ok_or(argon2::password_hash::Error::Crypto)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn hashed_ip_is_stable_and_hides_the_address() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        let salt = crate::config::Config::default().ip_hash_salt;
        let first = hash_ip(ip, &salt).unwrap();
        assert_eq!(first, hash_ip(ip, &salt).unwrap());
        assert!(!first.contains("192.168"));
    }

    #[test]
    fn bad_salt_is_an_error() {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(hash_ip(ip, "!").is_err());
    }
}
