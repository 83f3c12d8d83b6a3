//! Demo server: a shared counter page whose display reloads live

use async_trait::async_trait;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use renderable::{
    Fragment, FragmentConfig, LiveRouter, ObservableField, PageOptions, RenderContext,
    ServerConfig, SessionReaper, StateField, StateSchema,
};

struct CounterState {
    count: StateField<i64>,
}

impl Default for CounterState {
    fn default() -> Self {
        Self {
            count: StateField::new("count", 0),
        }
    }
}

impl StateSchema for CounterState {
    fn fields(&self) -> Vec<&dyn ObservableField> {
        vec![&self.count as &dyn ObservableField]
    }
}

struct CounterPage;

#[async_trait]
impl Fragment for CounterPage {
    fn kind(&self) -> &'static str {
        "CounterPage"
    }

    async fn render(&self, ctx: &mut RenderContext) -> anyhow::Result<()> {
        ctx.write("<h1>Live counter</h1>");
        ctx.mount(CountDisplay)?;
        ctx.mount(IncrementButton)?;
        Ok(())
    }
}

struct CountDisplay;

#[async_trait]
impl Fragment for CountDisplay {
    fn kind(&self) -> &'static str {
        "CountDisplay"
    }

    async fn render(&self, ctx: &mut RenderContext) -> anyhow::Result<()> {
        let state = ctx
            .state::<CounterState>()
            .ok_or_else(|| anyhow::anyhow!("session has no counter state"))?;
        ctx.write(&format!("<p>count={}</p>", state.count.get()));
        Ok(())
    }
}

/// Posts `step` back to its own endpoint and bumps the counter
struct IncrementButton;

#[async_trait]
impl Fragment for IncrementButton {
    fn kind(&self) -> &'static str {
        "IncrementButton"
    }

    async fn render(&self, ctx: &mut RenderContext) -> anyhow::Result<()> {
        if let Some(step) = ctx.input("step") {
            let step: i64 = step
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid step {:?}: {}", step, e))?;
            let state = ctx
                .state::<CounterState>()
                .ok_or_else(|| anyhow::anyhow!("session has no counter state"))?;
            state.count.update(|count| *count += step);
        }

        let id = ctx
            .fragment_id()
            .map(|id| id.to_string())
            .unwrap_or_default();
        let endpoint = ctx.endpoint().unwrap_or_default();
        ctx.write(&format!(
            r##"<input type="hidden" name="step" value="1"><button hx-post="{endpoint}" hx-include="#{id}" hx-target="#{id}">+1</button>"##
        ));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "renderable=debug,renderable_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("Starting renderable demo server");

    let live = LiveRouter::new(config.router.clone())
        .with_state_schema::<CounterState>()
        .fragment(FragmentConfig::builder("CounterPage").id("counter-page"))?
        .fragment(
            FragmentConfig::builder("CountDisplay")
                .id("count-display")
                .reload_on(["count"])
                .preload("<p>loading…</p>"),
        )?
        .fragment(FragmentConfig::builder("IncrementButton").id("increment"))?
        .page("/", PageOptions::default().title("Live counter"), || CounterPage)?;

    let reaper = SessionReaper::new(
        live.store(),
        config.router.session_max_age(),
        config.router.reaper_interval(),
    );
    tokio::spawn(reaper.run());

    let app = live
        .into_router()
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|e| format!("Invalid bind address {}: {}", config.bind_addr, e))?;

    tracing::info!("Renderable demo running on http://{}", addr);
    tracing::info!("  /                       - counter page");
    tracing::info!("  {}    - reload stream", config.router.sse_path());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            if e.kind() == std::io::ErrorKind::AddrInUse {
                tracing::error!("Port {} is already in use", addr.port());
            }
            return Err(format!("Failed to bind to {}: {}", addr, e).into());
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        return Err(format!("Server error: {}", e).into());
    }

    Ok(())
}
