use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use negotiation_copilot::logging;
use negotiation_copilot::mcts::SearchConfig;
use negotiation_copilot::oracle::{LlmOracle, LlmOracleConfig};
use negotiation_copilot::servers::{WebApiConfig, WebApiServer, WebSocketConfig, WebSocketServer};
use negotiation_copilot::services::NegotiationService;

#[derive(Parser, Debug)]
#[command(name = "negotiation_copilot")]
struct Config {
    /// Port for the HTTP API
    #[arg(short = 'p', long, default_value_t = 8000)]
    port: u16,

    /// Port for the websocket event stream
    #[arg(long, default_value_t = 9000)]
    ws_port: u16,

    /// Bind address for both servers
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Search iterations per request
    #[arg(short = 'i', long, default_value_t = 100)]
    iterations: usize,

    /// UCB1 exploration weight
    #[arg(long, default_value_t = 1.4)]
    exploration_weight: f64,

    /// Selection depth cap
    #[arg(long, default_value_t = 10)]
    max_depth: usize,

    /// Candidate replies requested from the oracle per state
    #[arg(long, default_value_t = 3)]
    branching: usize,

    /// Conversation turn horizon
    #[arg(long, default_value_t = 5)]
    max_turns: usize,

    /// Always use the full iteration budget, even after a high-confidence
    /// score has stopped improving
    #[arg(long, default_value_t = false)]
    no_early_stop: bool,

    /// Chat-completions model used by the scoring oracle
    #[arg(long, default_value = "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free")]
    model: String,

    /// Base URL of the chat-completions API
    #[arg(long, default_value = "https://api.together.xyz/v1")]
    base_url: String,

    /// API key for the scoring oracle
    #[arg(long, env = "TOGETHER_API_KEY", hide_env_values = true)]
    api_key: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::parse();
    let _logger = logging::init()?;

    log::info!(
        "starting negotiation copilot backend (model: {})",
        config.model
    );

    let oracle = Arc::new(LlmOracle::new(LlmOracleConfig {
        api_key: config.api_key,
        base_url: config.base_url,
        model: config.model,
        ..LlmOracleConfig::default()
    })?);

    let search_config = SearchConfig {
        iterations: config.iterations,
        exploration_weight: config.exploration_weight,
        max_depth: config.max_depth,
        early_termination: !config.no_early_stop,
        ..SearchConfig::default()
    };

    let service = Arc::new(
        NegotiationService::new(oracle, search_config)
            .with_limits(config.branching, config.max_turns),
    );

    // HTTP API in the background, websocket streaming in the foreground.
    let web_server = WebApiServer::new(
        WebApiConfig {
            port: config.port,
            host: config.host.clone(),
        },
        Arc::clone(&service),
    );
    tokio::spawn(async move {
        if let Err(e) = web_server.start().await {
            log::error!("HTTP server error: {e}");
        }
    });

    // Give the HTTP server a moment to bind before advertising readiness.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let ws_server = WebSocketServer::new(
        WebSocketConfig {
            port: config.ws_port,
            host: config.host,
            ..WebSocketConfig::default()
        },
        service,
    );
    ws_server.start().await?;
    Ok(())
}
