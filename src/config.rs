use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineIoConfig {
    /// The path to listen for engine.io requests on.
    /// Defaults to "/engine.io/".
    pub req_path: String,

    /// Maximum number of undelivered outbound messages per session.
    /// Once a session has `queue_length` queued messages, further
    /// [`Session::write`](crate::Session::write) calls return
    /// [`Error::QueueFull`](crate::Error::QueueFull).
    ///
    /// Defaults to 10 messages.
    pub queue_length: usize,

    /// The interval after which the server answers an idle polling request
    /// with a pong packet so the client knows the session is alive.
    /// Defaults to 25 seconds.
    pub ping_interval: Duration,

    /// The amount of inactivity the server tolerates on a websocket
    /// connection before closing it. Also bounds individual websocket writes.
    /// Defaults to 60 seconds.
    pub ping_timeout: Duration,

    /// Transport upgrades advertised in the handshake.
    /// Only "websocket" is supported.
    pub upgrades: Vec<String>,

    /// The maximum number of bytes accepted per http request body.
    /// Defaults to 100kb.
    pub max_payload: u64,
}

impl Default for EngineIoConfig {
    fn default() -> Self {
        Self {
            req_path: "/engine.io/".to_string(),
            queue_length: 10,
            ping_interval: Duration::from_millis(25000),
            ping_timeout: Duration::from_millis(60000),
            upgrades: vec!["websocket".to_string()],
            max_payload: 1e5 as u64, // 100kb
        }
    }
}

impl EngineIoConfig {
    pub fn builder() -> EngineIoConfigBuilder {
        EngineIoConfigBuilder::new()
    }
}

pub struct EngineIoConfigBuilder {
    config: EngineIoConfig,
}

impl EngineIoConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineIoConfig::default(),
        }
    }

    /// The path to listen for engine.io requests on.
    /// Defaults to "/engine.io/".
    pub fn req_path(mut self, req_path: impl Into<String>) -> Self {
        self.config.req_path = req_path.into();
        self
    }

    /// Maximum number of undelivered outbound messages per session.
    /// Defaults to 10 messages.
    pub fn queue_length(mut self, queue_length: usize) -> Self {
        self.config.queue_length = queue_length;
        self
    }

    /// The interval after which an idle polling request is answered with a
    /// pong packet. Defaults to 25 seconds.
    pub fn ping_interval(mut self, ping_interval: Duration) -> Self {
        self.config.ping_interval = ping_interval;
        self
    }

    /// The websocket inactivity limit. Defaults to 60 seconds.
    pub fn ping_timeout(mut self, ping_timeout: Duration) -> Self {
        self.config.ping_timeout = ping_timeout;
        self
    }

    /// Transport upgrades advertised in the handshake.
    /// Only "websocket" is supported.
    pub fn upgrades(mut self, upgrades: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.upgrades = upgrades.into_iter().map(Into::into).collect();
        self
    }

    /// The maximum number of bytes accepted per http request body.
    /// Defaults to 100kb.
    pub fn max_payload(mut self, max_payload: u64) -> Self {
        self.config.max_payload = max_payload;
        self
    }

    /// Build the config.
    pub fn build(self) -> EngineIoConfig {
        self.config
    }
}

impl Default for EngineIoConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineIoConfig::default();
        assert_eq!(config.req_path, "/engine.io/");
        assert_eq!(config.queue_length, 10);
        assert_eq!(config.ping_interval, Duration::from_millis(25000));
        assert_eq!(config.ping_timeout, Duration::from_millis(60000));
        assert_eq!(config.upgrades, vec!["websocket".to_string()]);
    }

    #[test]
    fn builder_overrides() {
        let config = EngineIoConfig::builder()
            .req_path("/transport/")
            .queue_length(4)
            .ping_interval(Duration::from_millis(300))
            .ping_timeout(Duration::from_millis(200))
            .max_payload(1024)
            .build();
        assert_eq!(config.req_path, "/transport/");
        assert_eq!(config.queue_length, 4);
        assert_eq!(config.ping_interval, Duration::from_millis(300));
        assert_eq!(config.ping_timeout, Duration::from_millis(200));
        assert_eq!(config.max_payload, 1024);
    }
}
