use booking_gateway::config::Args;
use booking_gateway::error::GatewayError;
use booking_gateway::rate_limit::AdmissionController;
use booking_gateway::state::AppState;
use booking_gateway::{build_router, sweeper};
use clap::Parser;
use log::info;
use std::net::SocketAddr;
use std::sync::Arc;

// this is main async function with tokio
#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    env_logger::init();

    // parse cli arguments
    let args = Args::parse();
    let policy = args.policy()?;
    let upstream = args.upstream_url()?;
    let sweep_interval = args.sweep_interval()?;

    info!(
        "Limits: {} requests per {:?}, {} requests per {:?}, first ban {:?}",
        policy.burst_limit,
        policy.burst_window,
        policy.sustained_limit,
        policy.sustained_window,
        policy.base_ban
    );

    // one limiter for the whole process, shared by every request
    let limiter = Arc::new(AdmissionController::new(policy));
    let state = Arc::new(AppState::new(upstream.clone(), Arc::clone(&limiter), args.trust_forwarded_for));

    tokio::spawn(sweeper::sweeper(limiter, sweep_interval));

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Gateway running on http://localhost:{}", args.port);
    info!("Forwarding /api to {}", upstream);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
