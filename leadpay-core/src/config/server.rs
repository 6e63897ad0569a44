use std::net::SocketAddr;

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}
