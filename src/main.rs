use std::env;
use std::sync::Arc;
use std::time::Duration;

use order_tracker::config::Config;
use order_tracker::error::TrackError;
use order_tracker::map::{LogSurface, MapRenderer};
use order_tracker::models::order::OrderId;
use order_tracker::observability::metrics::Metrics;
use order_tracker::push::PushChannelClient;
use order_tracker::push::transport::TransportSettings;
use order_tracker::session::{Session, SessionCredential};
use order_tracker::snapshot::RestTrackingApi;
use order_tracker::tracking::view::TrackingView;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), TrackError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let order_id = env::args()
        .nth(1)
        .map(OrderId::new)
        .ok_or_else(|| TrackError::Config("usage: order-tracker <order-id>".to_string()))?;
    let credential = config
        .session_token
        .clone()
        .map(SessionCredential::new)
        .ok_or_else(|| TrackError::Config("SESSION_TOKEN is required".to_string()))?;

    let metrics = Metrics::new();
    let channel = PushChannelClient::new(
        TransportSettings::new(
            config.push_url.clone(),
            config.push_transports.clone(),
            config.request_timeout,
            config.poll_timeout,
        ),
        metrics.clone(),
    );

    let mut session = Session::new(channel.clone());
    if let Err(err) = session.login(credential.clone()).await {
        warn!(error = %err, "push channel unavailable; continuing without live updates");
    }

    let api = Arc::new(RestTrackingApi::new(
        config.api_base_url.clone(),
        credential.clone(),
        config.request_timeout,
    )?);
    let mut view = TrackingView::new(api, channel.clone(), config.staleness_policy, metrics.clone());

    if let Err(err) = view.mount(order_id.clone()).await {
        error!(
            order_id = %order_id,
            error = %err,
            redirect = err.redirect_target().unwrap_or("-"),
            "cannot open tracking view"
        );
        session.logout().await;
        return Err(err);
    }

    let renderer = MapRenderer::new(config.default_center, config.map_zoom);
    let state = view.state();
    let render_task = tokio::spawn(async move {
        let mut surface = LogSurface::new();
        renderer.run(state, &mut surface).await;
        surface.frames()
    });

    let mut reconnect = tokio::time::interval(RECONNECT_INTERVAL);
    reconnect.tick().await;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = reconnect.tick() => {
                if view.is_live() {
                    continue;
                }
                match session.login(credential.clone()).await {
                    Ok(()) => {
                        if view.ensure_live() {
                            info!(order_id = %order_id, "live updates resumed");
                        }
                    }
                    Err(err) => debug!(error = %err, "push channel still unavailable"),
                }
            }
        }
    }

    view.unmount();
    drop(view);

    let frames = render_task
        .await
        .map_err(|err| TrackError::Internal(format!("renderer task failed: {err}")))?;
    session.logout().await;

    info!(frames, "tracking console stopped");
    match metrics.encode() {
        Ok(body) => debug!(metrics = %body, "final metrics"),
        Err(err) => warn!(error = %err, "failed to encode metrics"),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}
