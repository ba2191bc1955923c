use std::{sync::Arc, time::Duration};
use log::{debug, error, info};
use reqwest::Client;
use tokio::sync::RwLock;
use crate::{config::{CommandSpec, Config, SettingsSource}, request, state};

/// Upper bound on every outbound webhook call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Drives the PSU through the configured webhooks.
/// None of its operations fail from the caller's point of view: errors are logged and the state reads as off.
pub struct WebhookController {
    client: Client,
    config: RwLock<Arc<Config>>,
}

impl WebhookController {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: Config) -> Self {
        Self { client, config: RwLock::new(Arc::new(config)) }
    }

    /// The snapshot currently in use. Later reloads don't affect a snapshot already handed out.
    pub async fn config(&self) -> Arc<Config> {
        self.config.read().await.clone()
    }

    /// Rebuilds the config from `source` and swaps it in once complete.
    /// On failure the previous config stays in place.
    pub async fn reload(&self, source: &dyn SettingsSource) -> anyhow::Result<Arc<Config>> {
        let config = Arc::new(Config::load(source)?);
        *self.config.write().await = config.clone();
        info!("Reloaded settings");
        Ok(config)
    }

    pub async fn turn_psu_on(&self) {
        debug!("Switching PSU on");
        let config = self.config().await;
        self.fire(&config.address, &config.turn_psu_on).await;
    }

    pub async fn turn_psu_off(&self) {
        debug!("Switching PSU off");
        let config = self.config().await;
        self.fire(&config.address, &config.turn_psu_off).await;
    }

    /// Whether the PSU is on. Unreachable devices and broken rules both read as off.
    pub async fn get_psu_state(&self) -> bool {
        debug!("Fetching PSU state");
        let config = self.config().await;

        let resp = request::execute(&self.client, &config.address, &config.get_psu_state.command).await;
        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                error!("Error while fetching PSU state: {}", e);
                return false;
            }
        };
        debug!("PSU state query answered {}", resp.status);

        state::evaluate(&resp, &config.get_psu_state)
    }

    async fn fire(&self, address: &str, spec: &CommandSpec) {
        match request::execute(&self.client, address, spec).await {
            Ok(resp) => debug!("PSU switch answered {}: {}", resp.status, resp.body),
            Err(e) => error!("Error while switching PSU: {}", e),
        }
    }
}
