use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, TryRecvError};
use parley::emotion::Interpretation;
use parley::{Coordinator, Readiness, SessionConfig, Transcript};
use std::io::{BufRead, Write};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const TICK: Duration = Duration::from_millis(16);
const MAX_EXCHANGES: usize = 10;

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => SessionConfig::from_toml_file(path)?,
        None => SessionConfig::default(),
    };
    let export_path = args.next();

    info!("Starting Parley with prompt {}", config.prompt_path().display());

    // No backend is linked into the demo, so a model file cannot be honored
    let mut coordinator = Coordinator::setup(config.clone(), None)?;
    let mut transcript =
        Transcript::new(&config.user_label, &config.agent_label).with_max_exchanges(MAX_EXCHANGES);

    let (line_tx, line_rx) = unbounded::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!("(type /quit to leave, /unstick if the conversation stalls, /retrain <file> to switch prompts)");
    let mut stdout = std::io::stdout();
    let mut stdin_open = true;
    let mut affection = transcript.affection();

    loop {
        for fragment in coordinator.drain_all() {
            if let Interpretation::Visible(text) = transcript.feed(&fragment) {
                print!("{}", text);
            }
        }
        stdout.flush()?;

        if transcript.affection() != affection {
            affection = transcript.affection();
            info!(
                "{} feels {} (affection {}, meter {})",
                config.agent_label,
                transcript.emotion(),
                affection.value(),
                affection.meter_level()
            );
        }

        let status = coordinator.status();
        if status.readiness == Readiness::Failed {
            let error = status
                .last_error
                .unwrap_or_else(|| parley::ParleyError::NotReady("unknown".to_string()));
            eprintln!("{}", error.user_message());
            return Err(anyhow!(error));
        }

        match line_rx.try_recv() {
            Ok(line) => {
                let command = line.trim();
                if command == "/quit" {
                    break;
                } else if command == "/unstick" {
                    coordinator.submit_input(transcript.unstick());
                } else if let Some(file) = command.strip_prefix("/retrain ") {
                    coordinator.retrain(file.trim());
                } else if let Some(input) = transcript.compose_input(&line) {
                    coordinator.submit_input(input);
                } else {
                    println!("\n(wait for your turn)");
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => stdin_open = false,
        }

        let idle = status.is_ready() && !status.is_busy();
        if idle && (transcript.is_finished() || !stdin_open) {
            // Let the last fragments through before leaving
            for fragment in coordinator.drain_all() {
                if let Interpretation::Visible(text) = transcript.feed(&fragment) {
                    print!("{}", text);
                }
            }
            println!();
            break;
        }

        std::thread::sleep(TICK);
    }

    coordinator.teardown()?;

    if let Some(path) = export_path {
        std::fs::write(&path, transcript.to_json()?)?;
        info!("Transcript written to {}", path);
    }

    Ok(())
}
