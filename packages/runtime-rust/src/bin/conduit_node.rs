//! Conduit node: runs a loopback echo provider until Ctrl-C.
//!
//! On startup the node issues one internal invocation against its own echo
//! operation, so a fresh deployment proves the whole path (proxy, sender,
//! listener, dispatcher, call-context store) before it idles.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use conduit_core::{
    BusError, CommunicationStyle, Content, EndpointRef, ExchangePattern, NormalizedMessage,
    OperationDescription, Participant, QName, Transport as Via, IN, OUT,
};
use conduit_runtime::channel::{ChannelListener, ChannelSender, LocalTransport};
use conduit_runtime::config::{LogFormat, RuntimeConfig};
use conduit_runtime::dispatch::{
    command_fn, BoxCommand, CommandRegistry, CommandRequest, CommandResponse, ExchangeDispatcher,
    TrackingInterceptor,
};
use conduit_runtime::invoke::{OperationCache, OperationProxy, ServiceTarget, SingleTryController};
use conduit_runtime::store::{open_store, CallContextStore, MemoryDirectory};
use conduit_runtime::{telemetry, HeaderProjection, StaticCatalog};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "conduit-node")]
#[command(about = "Run a Conduit loopback node")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "CONDUIT_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format, overriding the configuration file
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

const NAMESPACE: &str = "urn:conduit:loopback";

fn echo_command(store: Arc<dyn CallContextStore>) -> BoxCommand {
    command_fn(move |mut req: CommandRequest| {
        let store = Arc::clone(&store);
        async move {
            let Some(ctx) = req.context().cloned() else {
                return Err(req.fail(BusError::protocol_violation("echo reached without context")));
            };
            // Park the context across the suspension point of a real provider.
            let parked = match store.store(&ctx).await {
                Ok(key) => store.restore(&key).await,
                Err(e) => Err(e),
            };
            if let Err(e) = parked {
                return Err(req.fail(e));
            }
            debug!(key = %ctx.key(), "call context parked and restored");

            let Some(request) = req.exchange.message(IN).cloned() else {
                return Err(req.fail(BusError::illegal_input("echo request has no payload")));
            };
            if ctx.style == CommunicationStyle::Oneway {
                return Ok(CommandResponse::complete(req.exchange));
            }
            req.exchange
                .set_message(OUT, NormalizedMessage::new(request.content));
            Ok(CommandResponse::reply(req.exchange))
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    telemetry::init_tracing(&config.logging);
    if config.provider_id.is_empty() {
        config.provider_id = "conduit-node".to_string();
    }
    info!(provider_id = %config.provider_id, "starting conduit node");

    let store = open_store(
        &config.store,
        &config.reconnect,
        Some(Arc::new(MemoryDirectory::new())),
    )
    .await
    .context("opening call context store")?;

    let service = QName::new(NAMESPACE, "Loopback");
    let echo = QName::new(NAMESPACE, "echo");
    let endpoint = EndpointRef::new(service.clone(), "loopback-local");
    let catalog = Arc::new(
        StaticCatalog::new()
            .with_operation(
                service.clone(),
                OperationDescription::new(echo.clone(), ExchangePattern::InOut)
                    .with_action(format!("{NAMESPACE}:echo")),
            )
            .with_participant(
                endpoint.clone(),
                Participant::new(config.provider_id.clone(), Via::Local),
            ),
    );
    let echo_store = Arc::clone(&store);
    let commands = CommandRegistry::new().with(echo.clone(), move |_, _| {
        echo_command(Arc::clone(&echo_store))
    });

    let (consumer_end, provider_end) = LocalTransport::pair("consumer", "provider");
    let mapper = Arc::new(HeaderProjection);

    let provider_sender = Arc::new(ChannelSender::new(
        provider_end.clone(),
        mapper.clone(),
        config.sender.clone(),
    ));
    let dispatcher = ExchangeDispatcher::new(
        Arc::clone(&provider_sender),
        catalog.clone(),
        mapper.clone(),
        catalog.clone(),
        catalog.clone(),
        Arc::new(commands),
    )
    .with_provider_id(config.provider_id.clone())
    .with_interceptor(Arc::new(TrackingInterceptor));
    let listener = ChannelListener::new(
        provider_end,
        provider_sender,
        Arc::new(dispatcher),
        config.listener.clone(),
    );
    listener.start().context("starting channel listener")?;

    let consumer_sender = Arc::new(ChannelSender::new(
        consumer_end,
        mapper.clone(),
        config.sender.clone(),
    ));
    let proxy = OperationProxy::new(consumer_sender, mapper);
    let controller = SingleTryController::new(
        catalog.clone(),
        catalog,
        OperationCache::new(),
        config.invocation.call_timeout_ms,
    )
    .with_provider_id(config.provider_id.clone())
    .with_participant(Participant::new(config.provider_id.clone(), Via::Local));

    let payload = Content::Tree(serde_json::json!({ "ping": config.provider_id }));
    match proxy
        .invoke_in_out(&controller, &[ServiceTarget::endpoint(endpoint)], &echo, payload)
        .await
    {
        Ok(reply) => info!(
            correlation = %reply.context.correlation_id,
            "loopback self-test answered"
        ),
        Err(e) => warn!(error = %e, "loopback self-test failed"),
    }

    info!("conduit node running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("shutting down");
    listener.stop().await;
    Ok(())
}
