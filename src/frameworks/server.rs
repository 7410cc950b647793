// Framework bootstrap for the sync server runtime.

use crate::domain::{GameState, PelletGrid};
use crate::frameworks::config::ServerSettings;
use crate::interface_adapters::net::{serve_tcp, ws_handler};
use crate::interface_adapters::protocol::{BinaryStateEncoder, JsonStateEncoder};
use crate::interface_adapters::state::AppState;
use crate::use_cases::{
    AdmissionPolicy, Broker, BrokerSettings, CommandInterpreter, HighResTicker, Outlet, Payload,
    TickLoop, demo_shutdown,
};

use axum::{Router, routing::get};
use std::future::IntoFuture;
use std::io::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

fn init_runtime() {
    // Load .env locally; safe to ignore when not present.
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

/// Runs the server on already-bound listeners until a listener fails or Ctrl-C.
pub async fn run(
    web_listener: TcpListener,
    tcp_listener: TcpListener,
    settings: ServerSettings,
) -> Result<()> {
    let web_address = web_listener.local_addr()?;

    // Both brokers feed one response queue; the tick loop is its only consumer.
    let (response_tx, response_rx) = mpsc::channel::<Payload>(settings.queue_capacity.max(1));

    let (web_broker, web_queue) = Broker::new(
        BrokerSettings {
            transport: "web",
            policy: AdmissionPolicy {
                one_per_ip: settings.one_browser_per_ip,
                trusted_ips: settings.trusted_browser_ips.clone(),
            },
            queue_capacity: settings.queue_capacity,
            client_queue_capacity: settings.client_queue_capacity,
        },
        response_tx.clone(),
    );
    let (tcp_broker, tcp_queue) = Broker::new(
        BrokerSettings {
            transport: "tcp",
            policy: AdmissionPolicy::default(),
            queue_capacity: settings.queue_capacity,
            client_queue_capacity: settings.client_queue_capacity,
        },
        response_tx,
    );
    tokio::spawn(Arc::clone(&web_broker).run_loop());
    tokio::spawn(Arc::clone(&tcp_broker).run_loop());

    // The pacing thread is the only fatal startup dependency besides the listeners.
    let ticker = Arc::new(
        HighResTicker::new(settings.target_fps)
            .map_err(|e| Error::other(format!("invalid tick rate: {e:?}")))?,
    );
    let ticker_thread = ticker
        .spawn()
        .map_err(|e| Error::other(format!("failed to start ticker: {e:?}")))
        .inspect_err(|e| error!(error = %e, "ticker startup failed"))?;

    let tick_loop = TickLoop {
        ticker: Arc::clone(&ticker),
        state: GameState::new(PelletGrid::filled()),
        interpreter: CommandInterpreter::new(settings.log_commands),
        responses: response_rx,
        outlets: vec![
            Outlet {
                broker: Arc::clone(&web_broker),
                queue: web_queue,
                encoder: Box::new(JsonStateEncoder),
            },
            Outlet {
                broker: Arc::clone(&tcp_broker),
                queue: tcp_queue,
                encoder: Box::new(BinaryStateEncoder),
            },
        ],
        frame_budget: settings.tick_budget,
    };
    tokio::spawn(async move {
        let (_, report) = tick_loop.run().await;
        info!(
            frames = report.frames,
            push_attempts = report.push_attempts,
            pushes_dropped = report.pushes_dropped,
            commands = report.commands,
            "tick loop finished"
        );
    });

    if let Some(after) = settings.demo_shutdown_after {
        tokio::spawn(demo_shutdown(
            vec![Arc::clone(&web_broker), Arc::clone(&tcp_broker)],
            Arc::clone(&ticker),
            after,
        ));
    }

    let state = Arc::new(AppState {
        web_broker: Arc::clone(&web_broker),
    });
    let app = Router::new().route("/", get(ws_handler)).with_state(state);
    info!(%web_address, "websocket listening");

    let web = axum::serve(
        web_listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    // Serve both transports and report errors rather than panicking.
    let result = tokio::select! {
        result = web.into_future() => result.inspect_err(|e| {
            error!(error = %e, "websocket server error");
        }),
        result = serve_tcp(tcp_listener, Arc::clone(&tcp_broker)) => result.inspect_err(|e| {
            error!(error = %e, "tcp server error");
        }),
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        }
    };

    web_broker.quit();
    tcp_broker.quit();
    ticker.stop();
    if !matches!(
        tokio::task::spawn_blocking(move || ticker_thread.join()).await,
        Ok(Ok(()))
    ) {
        error!("ticker thread did not shut down cleanly");
    }

    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the server runs until a listener fails.
        error!(error = %e, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();
    let settings = ServerSettings::from_env();

    let web_address = SocketAddr::new(settings.bind_host, settings.web_socket_port);
    let tcp_address = SocketAddr::new(settings.bind_host, settings.tcp_port);

    // Bind TCP listeners with error handling
    let web_listener = TcpListener::bind(web_address).await.inspect_err(|e| {
        error!(%web_address, error = %e, "failed to bind");
    })?;
    let tcp_listener = TcpListener::bind(tcp_address).await.inspect_err(|e| {
        error!(%tcp_address, error = %e, "failed to bind");
    })?;

    run(web_listener, tcp_listener, settings).await
}
