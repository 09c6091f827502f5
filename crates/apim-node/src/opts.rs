use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use apim_command::{MessageRecipient, RefresherConfig};
use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(name = "apim-node", version, about = "API management node running the command refresher")]
pub struct NodeOpts {
    /// Identifier of this node in the cluster (random when unset)
    #[arg(long, env = "APIM_NODE_ID")]
    pub node_id: Option<String>,

    /// Run as the cluster primary, purging expired commands
    #[arg(long, env = "APIM_PRIMARY", default_value_t = true, action = ArgAction::Set)]
    pub primary: bool,

    /// Polling interval in milliseconds (overrides APIM_COMMANDS_INTERVAL_MS)
    #[arg(long = "interval-ms")]
    pub interval_ms: Option<u64>,

    /// Bound on a single store call in milliseconds (overrides APIM_COMMANDS_STORE_TIMEOUT_MS)
    #[arg(long = "store-timeout-ms")]
    pub store_timeout_ms: Option<u64>,

    /// Recipient group to read commands for (overrides APIM_COMMANDS_RECIPIENT)
    #[arg(long)]
    pub recipient: Option<String>,
}

impl NodeOpts {
    pub fn node_id(&self) -> String {
        self.node_id
            .clone()
            .unwrap_or_else(|| format!("apim-{}", uuid::Uuid::new_v4()))
    }

    /// Refresher settings from the environment, then command-line overrides.
    pub fn refresher_config(&self) -> Result<RefresherConfig> {
        let mut config = RefresherConfig::from_env().context("read command refresher settings")?;
        if let Some(ms) = self.interval_ms {
            config.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.store_timeout_ms {
            config.store_timeout = Duration::from_millis(ms);
        }
        if let Some(recipient) = &self.recipient {
            config.recipient = MessageRecipient::parse(recipient)
                .ok_or_else(|| anyhow!("unknown recipient '{recipient}'"))?;
        }
        config.validate()?;
        Ok(config)
    }
}
