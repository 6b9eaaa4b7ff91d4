use std::net::{Ipv4Addr, SocketAddr};

#[derive(Debug, Clone)]
pub struct Config {
    // Listen address
    pub listen_addr: SocketAddr,
    // log level for http tracing
    pub log_level: tracing::Level,
}

impl Config {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            log_level: tracing::Level::INFO,
        }
    }

    /// Listen on every interface at `port`
    pub fn on_port(port: u16) -> Self {
        Self::new(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), port))
    }
}
