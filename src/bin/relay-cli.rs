use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use std::path::PathBuf;

use incident_relay::approval::{sign_decision, Decision};
use incident_relay::config::{ReporterConfig, TransportConfig};
use incident_relay::realtime::{Channel, ObserverClient, ObserverEvent};
use incident_relay::reporting::{IncidentReporter, RawTestResult, TestExecutionResult};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Operator CLI for the incident relay", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080", env = "RELAY_URL")]
    url: String,

    /// Session token from `login`
    #[arg(short, long, env = "RELAY_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Verdict {
    Approve,
    Reject,
}

impl From<Verdict> for Decision {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Approve => Decision::Approve,
            Verdict::Reject => Decision::Reject,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check relay health
    Status,
    /// List incidents, or show one
    Incidents {
        id: Option<String>,
    },
    /// Log in and print a session token
    Login {
        username: String,
        #[arg(long, env = "RELAY_PASSWORD")]
        password: String,
    },
    /// Open an approval request for an incident
    RequestApproval {
        incident_id: String,
        #[arg(long, default_value = "medium")]
        priority: String,
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Sign and submit a decision
    Decide {
        request_id: String,
        #[arg(value_enum)]
        decision: Verdict,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        user_name: String,
        #[arg(long)]
        reason: Option<String>,
        /// Shared decision secret
        #[arg(long, env = "RELAY_APPROVAL_SECRET")]
        secret: String,
    },
    /// Report test result files as incidents
    Report {
        /// JSON test results as written by the test runner
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, env = "RELAY_TRANSPORT_SECRET", default_value = "")]
        secret: String,
        #[arg(long, default_value = "http://localhost:8080/artifacts")]
        artifact_url: String,
    },
    /// Stream live events
    Watch {
        #[arg(long, value_delimiter = ',')]
        channels: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if let Some(token) = &cli.token {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
    }

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Incidents { id } => {
            let path = match id {
                Some(id) => format!("{}/api/incidents/{id}", cli.url),
                None => format!("{}/api/incidents", cli.url),
            };
            let res = client.get(path).send().await?;
            print_response(res).await?;
        }
        Commands::Login { username, password } => {
            let res = client
                .post(format!("{}/api/auth/login", cli.url))
                .json(&json!({"username": username, "password": password}))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::RequestApproval { incident_id, priority, ttl_secs } => {
            let res = client
                .post(format!("{}/api/approval/request", cli.url))
                .headers(headers)
                .json(&json!({"incident_id": incident_id, "priority": priority, "ttl_secs": ttl_secs}))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Decide { request_id, decision, user_id, user_name, reason, secret } => {
            let decision = Decision::from(decision);
            let timestamp = Utc::now();
            let signature = sign_decision(&secret, &request_id, decision, &user_id, &timestamp);
            let res = client
                .post(format!("{}/api/approval/decision", cli.url))
                .headers(headers)
                .json(&json!({
                    "request_id": request_id,
                    "decision": decision,
                    "user_id": user_id,
                    "user_name": user_name,
                    "reason": reason,
                    "signature": signature,
                    "timestamp": timestamp,
                }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Report { files, secret, artifact_url } => {
            let reporter = IncidentReporter::new(
                &ReporterConfig { base_artifact_url: artifact_url },
                &TransportConfig {
                    endpoint: format!("{}/webhook/incident", cli.url),
                    secret,
                    ..TransportConfig::default()
                },
            );
            let mut pending = Vec::with_capacity(files.len());
            for file in files {
                let raw: RawTestResult = serde_json::from_slice(&std::fs::read(&file)?)?;
                pending.push((file, reporter.report_in_background(TestExecutionResult::from(raw))));
            }
            for (file, handle) in pending {
                match handle.await? {
                    Some(receipt) => println!(
                        "{}: delivered after {} attempt(s), status {}{}",
                        file.display(),
                        receipt.attempts,
                        receipt.status,
                        if receipt.signed { ", signed" } else { "" }
                    ),
                    None => println!("{}: nothing delivered (passing test or delivery failed)", file.display()),
                }
            }
        }
        Commands::Watch { channels } => {
            let ws_url = format!("{}/ws", cli.url.replacen("http", "ws", 1));
            let channels: Vec<Channel> = channels
                .iter()
                .filter_map(|c| serde_json::from_value(Value::from(c.as_str())).ok())
                .collect();
            let mut observer = ObserverClient::new(ws_url).with_channels(channels);
            if let Some(token) = &cli.token {
                observer = observer.with_token(token.clone());
            }
            let mut events = observer.spawn();
            while let Some(event) = events.recv().await {
                match event {
                    ObserverEvent::Connected => eprintln!("connected"),
                    ObserverEvent::Resync => {
                        eprintln!("reconnected; refetching incidents");
                        let res = client.get(format!("{}/api/incidents", cli.url)).send().await?;
                        print_response(res).await?;
                    }
                    ObserverEvent::Event(event) => println!("{}", serde_json::to_string(&event)?),
                    ObserverEvent::Control(value) => eprintln!("{value}"),
                    ObserverEvent::Disconnected { attempts } => {
                        eprintln!("giving up after {attempts} reconnect attempt(s)");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: relay returned status {status}");
        if let Ok(text) = res.text().await {
            eprintln!("Response: {text}");
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
