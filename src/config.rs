use clap::Parser;

/// Real-time multiplayer number-guessing server
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct ServerConfig {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[clap(short, long, default_value_t = 4000)]
    pub port: u16,

    /// Seed for target rolls; random when omitted
    #[clap(long)]
    pub seed: Option<u64>,

    /// Capacity of the engine's request queue
    #[clap(long, default_value_t = 1024)]
    pub queue_capacity: usize,

    /// Capacity of the outbound broadcast channel
    #[clap(long, default_value_t = 1024)]
    pub broadcast_capacity: usize,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            seed: None,
            queue_capacity: 1024,
            broadcast_capacity: 1024,
        }
    }
}
