//! Serial Device Config - Main Entry Point

use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use serial_device_config::{
    config::{CliArgs, CliCommand, FirmwareManifest, SetArgs, Settings},
    core::{
        error::{ProtocolError, ServiceResult},
        session::DeviceSession,
        types::{ApplyOutcome, DeviceConfiguration},
    },
    protocol::{
        ApplyResponse, ConfigResponse, ErrorResponse, ManifestResponse, PortsResponse,
        ScanResultsResponse,
    },
    transport::{SerialPortTransport, list_ports},
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Rendered command output
struct Report {
    json: String,
    success: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing; stdout is reserved for the JSON output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,serial_device_config=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();
    info!(
        port = %args.port,
        baud = args.baud,
        "Starting serial device config"
    );

    let command = args.command.clone();
    let settings = Settings::from(args);

    let result = tokio::select! {
        result = run(command, settings) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received SIGINT (Ctrl+C), aborting");
            return ExitCode::from(130);
        }
    };

    match result {
        Ok(report) => {
            println!("{}", report.json);
            if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{}", e);
            match render(&ErrorResponse::new(&e)) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("Failed to render error response: {}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: CliCommand, settings: Settings) -> ServiceResult<Report> {
    match command {
        CliCommand::Ports => {
            let ports = list_ports()?;
            info!("Found {} serial ports", ports.len());
            ok(&PortsResponse::ok(ports))
        }
        CliCommand::Manifest { path } => {
            let manifest = FirmwareManifest::load(&path).await?;
            info!("Published firmware version {}", manifest.version);
            ok(&ManifestResponse::ok(manifest.version))
        }
        CliCommand::Get => {
            let (session, config) = open_session(&settings).await?;
            session.disconnect().await;
            ok(&ConfigResponse::ok(config))
        }
        CliCommand::Scan => {
            let (session, _) = open_session(&settings).await?;
            let result = session.scan_wifi().await;
            session.disconnect().await;
            ok(&ScanResultsResponse::ok(result?))
        }
        CliCommand::Set(set) => apply(&settings, &set).await,
    }
}

async fn apply(settings: &Settings, set: &SetArgs) -> ServiceResult<Report> {
    let (session, current) = open_session(settings).await?;

    let result = match set.apply_to(&current.settings) {
        Ok(proposed) => session.apply_config(proposed).await,
        Err(e) => Err(e),
    };
    session.disconnect().await;
    let report = result?;

    match &report.outcome {
        ApplyOutcome::Applied => info!("Configuration applied and verified"),
        ApplyOutcome::NoChange => info!("Nothing to change"),
        ApplyOutcome::Mismatch { fields } => {
            error!("Device kept different values for: {}", fields.join(", "))
        }
        ApplyOutcome::VerifyFailed => error!("Could not verify the configuration after reboot"),
    }

    let response = ApplyResponse::new(report.outcome, &report.diff);
    Ok(Report {
        success: response.status == "ok",
        json: render(&response)?,
    })
}

async fn open_session(
    settings: &Settings,
) -> ServiceResult<(DeviceSession<SerialPortTransport>, DeviceConfiguration)> {
    let transport = SerialPortTransport::open(&settings.serial)?;
    let session = DeviceSession::new(settings.protocol);
    info!(session = %session.id(), "Session created for {}", transport.port_name());

    let config = session.connect(transport).await?;
    info!("Device firmware {}", config.firmware_label());
    Ok((session, config))
}

fn ok<T: Serialize>(response: &T) -> ServiceResult<Report> {
    Ok(Report {
        json: render(response)?,
        success: true,
    })
}

fn render<T: Serialize>(response: &T) -> ServiceResult<String> {
    Ok(serde_json::to_string_pretty(response).map_err(ProtocolError::from)?)
}
