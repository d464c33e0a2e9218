use anyhow::Context;
use gh_mind::{CandidateSelector, GhMind, Outcome, Ports};
use settings_store::SettingsStore;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use wtd_client::{AuthSession, BackendClient, IdentityHandle};
use wtd_core::{AppConfig, DistanceBand, ErrorExt, FeedbackAction, Mode, NewPost};

const DEFAULT_CONFIG_PATH: &str = "wtd.toml";

const HELP: &str = "\
commands:
  bored | hungry | unsure      pick how you feel
  yes | no | skip              answer the current suggestion
  up | down                    vote on the current suggestion
  distance <near|medium|far|any>
  post <topic> <title>         share something (signed in)
  login <email> <password>
  logout
  reload
  stats [endpoint|reset]       backend request counters
  help
  quit";

#[derive(Debug)]
enum Command {
    Mode(Mode),
    Respond(FeedbackAction),
    Distance(DistanceBand),
    Post { topic: String, title: String },
    Login { email: String, password: String },
    Logout,
    Reload,
    Stats(StatsView),
    Help,
    Quit,
}

#[derive(Debug)]
enum StatsView {
    All,
    Endpoint(String),
    Reset,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err(String::new());
    };

    let command = match head.to_lowercase().as_str() {
        "bored" | "hungry" | "unsure" | "idk" => {
            Command::Mode(Mode::from_str(head).map_err(|e| e.user_friendly_message())?)
        }
        "yes" => Command::Respond(FeedbackAction::Yes),
        "no" => Command::Respond(FeedbackAction::No),
        "skip" => Command::Respond(FeedbackAction::Skip),
        "up" => Command::Respond(FeedbackAction::Upvote),
        "down" => Command::Respond(FeedbackAction::Downvote),
        "distance" => {
            let raw = words.next().ok_or("usage: distance <near|medium|far|any>")?;
            Command::Distance(DistanceBand::from_str(raw).map_err(|e| e.user_friendly_message())?)
        }
        "post" => {
            let topic = words.next().ok_or("usage: post <topic> <title>")?.to_string();
            let title = words.collect::<Vec<_>>().join(" ");
            Command::Post { topic, title }
        }
        "login" => match (words.next(), words.next()) {
            (Some(email), Some(password)) => Command::Login {
                email: email.to_string(),
                password: password.to_string(),
            },
            _ => return Err("usage: login <email> <password>".to_string()),
        },
        "logout" => Command::Logout,
        "reload" => Command::Reload,
        "stats" => Command::Stats(match words.next() {
            None => StatsView::All,
            Some("reset") => StatsView::Reset,
            Some(endpoint) => StatsView::Endpoint(endpoint.to_string()),
        }),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(command)
}

async fn show_stats(client: &BackendClient, view: StatsView) {
    match view {
        StatsView::All => {
            match client.export_metrics().await {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    e.log_warn();
                }
            }
            let retry = client.retry_metrics();
            println!(
                "retries: {} ({} recovered), failed operations: {}, blocked by breaker: {}",
                retry.total_retries,
                retry.successful_retries,
                retry.failed_operations,
                retry.circuit_breaker_trips
            );
        }
        StatsView::Endpoint(endpoint) => match client.endpoint_metrics(&endpoint).await {
            Some(metrics) => println!(
                "{}: {} requests, {:.0}% ok, avg {:?}, last status {}",
                endpoint,
                metrics.request_count,
                metrics.success_rate() * 100.0,
                metrics.average_response_time(),
                metrics
                    .last_status
                    .map_or_else(|| "none".to_string(), |s| s.to_string())
            ),
            None => println!("No requests to {} yet.", endpoint),
        },
        StatsView::Reset => {
            client.reset_metrics().await;
            println!("Request counters cleared.");
        }
    }
}

fn render(outcome: &Outcome) {
    match outcome {
        Outcome::Suggested(card) => {
            let item = &card.item;
            println!();
            println!("  {}  [{}]", item.display_title(), item.effective_topic());
            if !item.body.is_empty() {
                println!("  {}", item.body);
            }
            if let Some(distance) = item.distance_m {
                println!("  {:.1} km away", distance / 1000.0);
            }
            println!("  {}", card.why);
            println!("  {}", card.meta);
            println!("  {}", card.hint);
        }
        Outcome::Idle { message }
        | Outcome::Exhausted { message }
        | Outcome::Unavailable { message } => {
            if !message.is_empty() {
                println!("{}", message);
            }
        }
    }
}

enum Event {
    Line(Option<String>),
    IdentityChanged,
    IdentityClosed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WTD_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting WTD for place {}", config.place_id);

    let settings = Arc::new(
        SettingsStore::open(config.settings_database_url.as_str())
            .await
            .context("opening settings store")?,
    );

    let initial_session = match (&config.user_id, &config.access_token) {
        (Some(user), Some(token)) => Some(AuthSession::new(user.clone(), token.clone())),
        _ => None,
    };
    let identity = IdentityHandle::new(initial_session);
    let client = Arc::new(BackendClient::new(&config, identity.clone())?);

    let ports = Ports {
        feed: client.clone(),
        affinity: client.clone(),
        feedback: client.clone(),
        votes: client.clone(),
        distance: settings.clone(),
    };
    let mut engine = GhMind::new(
        config.place_id.clone(),
        ports,
        CandidateSelector::default(),
    )
    .with_center(config.center);

    let mut identity_rx = identity.subscribe();
    let startup = match identity.user_id() {
        Some(user_id) => engine.set_identity(Some(user_id)).await,
        None => engine.reload().await,
    };
    render(&startup);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let event = tokio::select! {
            line = lines.next_line() => Event::Line(line.context("reading stdin")?),
            changed = identity_rx.changed() => match changed {
                Ok(()) => Event::IdentityChanged,
                Err(_) => Event::IdentityClosed,
            },
        };

        let line = match event {
            Event::IdentityChanged => {
                let user_id = identity_rx.borrow_and_update().clone();
                render(&engine.set_identity(user_id).await);
                continue;
            }
            Event::IdentityClosed => {
                tracing::warn!("Identity channel closed");
                break;
            }
            Event::Line(None) => break,
            Event::Line(Some(line)) => line,
        };

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                if !message.is_empty() {
                    println!("{}", message);
                }
                continue;
            }
        };

        let outcome = match command {
            Command::Mode(mode) => engine.select_mode(mode).await,
            Command::Respond(action) => engine.respond(action).await,
            Command::Distance(band) => engine.set_distance_band(band).await,
            Command::Reload => engine.reload().await,
            Command::Post { topic, title } => {
                let Some(user_id) = identity.user_id() else {
                    println!("Please log in to post.");
                    continue;
                };
                let post = NewPost::validate(
                    &config.place_id,
                    &user_id,
                    None,
                    Some(&topic),
                    &title,
                    "",
                );
                match post {
                    Ok(post) => match client.create_post(&post).await {
                        Ok(()) => engine.reload().await,
                        Err(e) => {
                            e.log_error();
                            println!("{}", e.user_friendly_message());
                            continue;
                        }
                    },
                    Err(e) => {
                        println!("{}", e.user_friendly_message());
                        continue;
                    }
                }
            }
            Command::Login { email, password } => {
                if let Err(e) = client.sign_in_with_password(&email, &password).await {
                    e.log_warn();
                    println!("{}", e.user_friendly_message());
                }
                // The identity change arrives through the watch channel.
                continue;
            }
            Command::Logout => {
                client.sign_out();
                continue;
            }
            Command::Stats(view) => {
                show_stats(&client, view).await;
                continue;
            }
            Command::Help => {
                println!("{}", HELP);
                continue;
            }
            Command::Quit => break,
        };
        render(&outcome);
    }

    let metrics = client.get_metrics().await;
    tracing::info!(
        "Shutting down after {} backend requests ({} failed)",
        metrics.total_requests,
        metrics.failed_requests
    );
    Ok(())
}
