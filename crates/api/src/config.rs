use rust_decimal::Decimal;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development except the
/// secrets (`BOT_TOKEN`, `GEN_API_KEY`), which must be set.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Messaging-platform bot token. Shared by every instance of a
    /// deployment; the leader lock key is derived from it.
    pub bot_token: String,
    /// Messaging platform API base URL (default: `https://api.telegram.org`).
    pub messaging_api_url: String,
    /// Secret path segment for the inbound update webhook.
    pub webhook_secret: String,
    /// Publicly reachable base URL of this deployment, used when
    /// registering the webhook and the generation callback.
    pub public_base_url: String,
    /// Generation API base URL.
    pub gen_api_url: String,
    /// Generation API account key. One account shared by all instances.
    pub gen_api_key: String,
    /// Shared secret expected in `X-Callback-Token` on generation callbacks.
    pub callback_token: String,
    /// Credits charged per generation. Zero means generations are free and
    /// no charge is reserved.
    pub generation_price: Decimal,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Unique identity of this process instance, generated at startup.
    /// Used as the lock holder id and reported by /health.
    pub instance_id: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                       |
    /// |-------------------------|-------------------------------|
    /// | `HOST`                  | `0.0.0.0`                     |
    /// | `PORT`                  | `3000`                        |
    /// | `BOT_TOKEN`             | (required)                    |
    /// | `MESSAGING_API_URL`     | `https://api.telegram.org`    |
    /// | `WEBHOOK_SECRET`        | `updates`                     |
    /// | `PUBLIC_BASE_URL`       | `http://localhost:3000`       |
    /// | `GEN_API_URL`           | `http://localhost:8700/api`   |
    /// | `GEN_API_KEY`           | (required)                    |
    /// | `CALLBACK_TOKEN`        | `dev-callback-token`          |
    /// | `GENERATION_PRICE`      | `1.00`                        |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                          |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                          |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let bot_token = std::env::var("BOT_TOKEN").expect("BOT_TOKEN must be set");

        let messaging_api_url = std::env::var("MESSAGING_API_URL")
            .unwrap_or_else(|_| "https://api.telegram.org".into());

        let webhook_secret =
            std::env::var("WEBHOOK_SECRET").unwrap_or_else(|_| "updates".into());

        let public_base_url =
            std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".into());

        let gen_api_url =
            std::env::var("GEN_API_URL").unwrap_or_else(|_| "http://localhost:8700/api".into());

        let gen_api_key = std::env::var("GEN_API_KEY").expect("GEN_API_KEY must be set");

        let callback_token =
            std::env::var("CALLBACK_TOKEN").unwrap_or_else(|_| "dev-callback-token".into());

        let generation_price: Decimal = std::env::var("GENERATION_PRICE")
            .unwrap_or_else(|_| "1.00".into())
            .parse()
            .expect("GENERATION_PRICE must be a valid decimal");

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            bot_token,
            messaging_api_url,
            webhook_secret,
            public_base_url,
            gen_api_url,
            gen_api_key,
            callback_token,
            generation_price,
            request_timeout_secs,
            shutdown_timeout_secs,
            instance_id: uuid::Uuid::now_v7().to_string(),
        }
    }

    /// URL the messaging platform should deliver updates to.
    pub fn webhook_url(&self) -> String {
        format!("{}/webhook/{}", self.public_base_url, self.webhook_secret)
    }

    /// URL the generation service should call on task completion.
    pub fn callback_url(&self) -> String {
        format!("{}/callback/generation", self.public_base_url)
    }
}
