use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tethercam::testing::FakeCamera;
use tethercam::{
    CandidateTable, ConnectionState, SemanticParam, SessionEvent, TetherConfig, TetherSession,
};

fn main() -> Result<()> {
    tethercam::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: tethercam-cli <simulate|candidates|config|version> [args]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "simulate" => cmd_simulate(&args),
        "candidates" => cmd_candidates(&args),
        "config" => cmd_config(&args),
        "version" => cmd_version(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn cmd_version(args: &[String]) -> Result<()> {
    let info = tethercam::get_info();
    if args.iter().any(|a| a == "--json") {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("{} {}", info.name, info.version);
        println!("{}", info.description);
    }
    Ok(())
}

fn flag_value(args: &[String], flag: &str) -> Result<Option<u64>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => {
            let raw = args
                .get(i + 1)
                .ok_or_else(|| anyhow!("{} needs a value", flag))?;
            let value = raw
                .parse()
                .with_context(|| format!("{} expects milliseconds, got '{}'", flag, raw))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn cmd_simulate(args: &[String]) -> Result<()> {
    // simulate [--poll-ms <n>] [--settle-ms <n>] [--json]
    let mut config = TetherConfig::load_layered(TetherConfig::default_path())?;
    if let Some(ms) = flag_value(args, "--poll-ms")? {
        config.sync.poll_interval_ms = ms;
    }
    if let Some(ms) = flag_value(args, "--settle-ms")? {
        config.sync.settle_delay_ms = ms;
    }
    let json = args.contains(&"--json".to_string());

    let runtime = tokio::runtime::Runtime::new().context("Failed to start Tokio runtime")?;
    runtime.block_on(simulate(config, json))
}

async fn simulate(config: TetherConfig, json: bool) -> Result<()> {
    let camera = FakeCamera::builder()
        .with_value("isospeed", &["100", "200", "400", "800", "1600"], "200")
        .with_value("shutterspeed", &["1/60", "1/125", "1/250"], "1/125")
        .with_value("f-number", &["2.8", "4", "5.6"], "4")
        .with_key("whitebalance", &["Auto", "Daylight"])
        .with_latency(Duration::from_millis(20))
        .build();

    let session = TetherSession::spawn(camera, &config)?;
    let mut events = session.subscribe();

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    session.connection_changed(ConnectionState::Connected).await?;

    let driver = session.clone();
    tokio::spawn(async move {
        if let Err(e) = driver.write(SemanticParam::Iso, "800").await {
            log::warn!("Simulated write failed: {}", e);
        }
        if let Err(e) = driver.capture(None).await {
            log::warn!("Simulated capture failed: {}", e);
        }
    });

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, json)?,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Dropped {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.shutdown().await;
    Ok(())
}

fn print_event(event: &SessionEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        SessionEvent::StatusChanged { state, session_id } => match session_id {
            Some(id) => println!("status: {:?} ({})", state, id),
            None => println!("status: {:?}", state),
        },
        SessionEvent::AliasesResolved {
            resolved,
            unavailable,
        } => {
            println!("resolved: {}", join(resolved));
            println!("unavailable: {}", join(unavailable));
        }
        SessionEvent::ParametersUpdated { parameters } => println!(
            "params: iso {} shutter {} aperture {} remaining {:?}",
            parameters.iso,
            parameters.shutter_speed,
            parameters.aperture,
            parameters.images_remaining
        ),
        SessionEvent::Captured { result } => println!("captured: {}", result.file_path.display()),
        SessionEvent::Error { message } => println!("error: {}", message),
    }
    Ok(())
}

fn join(params: &[SemanticParam]) -> String {
    params
        .iter()
        .map(SemanticParam::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn cmd_candidates(args: &[String]) -> Result<()> {
    let config = TetherConfig::load_layered(TetherConfig::default_path())?;
    let table: CandidateTable = config.candidate_table()?;
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&table)?);
    } else {
        for (param, keys) in table.iter() {
            println!("{}: {}", param, keys.join(", "));
        }
    }
    Ok(())
}

fn cmd_config(args: &[String]) -> Result<()> {
    let path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(TetherConfig::default_path);
    let config = TetherConfig::load_layered(&path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
