//! Kafka-specific connection configuration

use std::collections::HashMap;

/// Connection configuration for the Kafka log backend
#[derive(Clone, Debug)]
pub struct KafkaConnectionConfig {
    bootstrap_servers: String,
    client_id: Option<String>,
    sasl_username: Option<String>,
    sasl_password: Option<String>,
    use_tls: bool,
    timeout_ms: i32,
    subscription_capacity: usize,
    additional_config: HashMap<String, String>,
}

impl KafkaConnectionConfig {
    /// Create a new connection configuration with required bootstrap servers.
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            client_id: None,
            sasl_username: None,
            sasl_password: None,
            use_tls: false,
            timeout_ms: 10_000,
            subscription_capacity: 256,
            additional_config: HashMap::new(),
        }
    }

    /// Builder-style setter for client id.
    pub fn set_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// SASL/PLAIN credentials. Ignored unless both are non-empty.
    pub fn set_sasl_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let (username, password) = (username.into(), password.into());
        if !username.is_empty() && !password.is_empty() {
            self.sasl_username = Some(username);
            self.sasl_password = Some(password);
        }
        self
    }

    pub fn set_use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Builder-style setter for the produce/delivery timeout in milliseconds.
    pub fn set_timeout_ms(mut self, timeout_ms: i32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn set_subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity.max(1);
        self
    }

    /// Builder-style setter for additional key/value configuration pairs.
    pub fn insert_additional_config<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.additional_config.insert(key.into(), value.into());
        self
    }

    pub fn bootstrap_servers(&self) -> &str {
        &self.bootstrap_servers
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn sasl_username(&self) -> Option<&str> {
        self.sasl_username.as_deref()
    }

    pub fn sasl_password(&self) -> Option<&str> {
        self.sasl_password.as_deref()
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    pub fn timeout_ms(&self) -> i32 {
        self.timeout_ms
    }

    pub fn subscription_capacity(&self) -> usize {
        self.subscription_capacity
    }

    pub fn additional_config(&self) -> &HashMap<String, String> {
        &self.additional_config
    }

    /// librdkafka `security.protocol` implied by the SASL and TLS settings.
    pub fn security_protocol(&self) -> &'static str {
        match (self.sasl_username.is_some(), self.use_tls) {
            (true, true) => "SASL_SSL",
            (true, false) => "SASL_PLAINTEXT",
            (false, true) => "SSL",
            (false, false) => "PLAINTEXT",
        }
    }

    /// Flatten into librdkafka key/value pairs shared by producers and consumers.
    ///
    /// Additional config is applied last so it can override anything derived here.
    pub fn client_properties(&self) -> Vec<(String, String)> {
        let mut props = vec![
            ("bootstrap.servers".to_string(), self.bootstrap_servers.clone()),
            (
                "security.protocol".to_string(),
                self.security_protocol().to_string(),
            ),
        ];
        if let Some(client_id) = &self.client_id {
            props.push(("client.id".to_string(), client_id.clone()));
        }
        if let (Some(user), Some(pass)) = (&self.sasl_username, &self.sasl_password) {
            props.push(("sasl.mechanisms".to_string(), "PLAIN".to_string()));
            props.push(("sasl.username".to_string(), user.clone()));
            props.push(("sasl.password".to_string(), pass.clone()));
        }
        for (key, value) in &self.additional_config {
            props.push((key.clone(), value.clone()));
        }
        props
    }
}

impl Default for KafkaConnectionConfig {
    fn default() -> Self {
        Self::new("localhost:9092")
    }
}
