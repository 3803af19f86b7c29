use clap::Parser;
use eventwire::{
    Error,
    config::SystemConfig,
    event::{
        envelope::TypedEvent,
        responder::{HandlerError, handler_fn},
        workflows::{UserFetch, UserFetched},
    },
    scoring::{
        profile::Ranking,
        strategy::{CandidateEvent, ParticipatedEvent, ScoringStrategy},
    },
    system::System,
};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEMO_PROFILE: &str = r#"{"profile":{"sportsOfPreference":[{"name":"tennis","ranking":"INTERMEDIATE"},{"name":"padel","ranking":"ADVANCED"}]}}"#;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// User to select a strategy for
    #[arg(short, long)]
    user_id: String,

    /// Past participation as sport:LEVEL, repeatable
    #[arg(long = "history", value_parser = parse_sport_level)]
    history: Vec<(String, Ranking)>,

    /// Candidate event as sport:LEVEL, repeatable
    #[arg(long = "candidate", value_parser = parse_sport_level)]
    candidates: Vec<(String, Ranking)>,

    /// Profile document served by the demo users service
    #[arg(long, default_value = DEMO_PROFILE)]
    profile: String,
}

fn parse_sport_level(raw: &str) -> Result<(String, Ranking), String> {
    let (sport, level) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected sport:LEVEL, got {raw:?}"))?;
    if sport.trim().is_empty() {
        return Err(format!("missing sport in {raw:?}"));
    }
    Ok((sport.trim().to_string(), Ranking::parse_lenient(Some(level))))
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config = if cli.config.exists() {
        SystemConfig::from_file(&cli.config)?
    } else {
        SystemConfig::default()
    };
    info!("config loaded.");
    debug!("config: {:?}", config);

    let system = System::in_memory(&config);
    system.start().await?;

    // Stand-in for the users service on the same bus
    let profile: Arc<str> = cli.profile.into();
    system
        .serve(Arc::new(handler_fn(move |request: TypedEvent<UserFetch>| {
            let profile = profile.clone();
            async move {
                Ok::<_, HandlerError>(UserFetched {
                    user_id: request.payload.user_id,
                    user: profile.to_string(),
                })
            }
        })))
        .await?;

    let history: Vec<ParticipatedEvent> = cli
        .history
        .into_iter()
        .enumerate()
        .map(|(i, (sport, level))| ParticipatedEvent {
            event_id: format!("history-{i}"),
            sport,
            level,
        })
        .collect();
    let candidates: Vec<CandidateEvent> = cli
        .candidates
        .into_iter()
        .enumerate()
        .map(|(i, (sport, level))| CandidateEvent {
            event_id: format!("candidate-{i}"),
            sport,
            level,
        })
        .collect();

    let strategy = system.selector().select(&cli.user_id, &history).await?;
    println!("Selected {} strategy for {}", strategy.name(), cli.user_id);
    for scored in strategy.rank(&candidates) {
        println!(
            "  {:.3}  {} ({}, {})",
            scored.score, scored.event.event_id, scored.event.sport, scored.event.level
        );
    }

    system.shutdown().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
