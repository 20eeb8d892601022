//! Tunables shared by the sender, connection, and driver glue.

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Initial retransmission timeout, in milliseconds.
    pub rt_timeout: u64,
    /// Consecutive retransmissions allowed before the connection aborts.
    pub max_retx_attempts: u32,
    /// Largest payload a single outgoing segment carries.
    pub max_payload_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rt_timeout: 1000,
            max_retx_attempts: 8,
            max_payload_size: 1000,
        }
    }
}
