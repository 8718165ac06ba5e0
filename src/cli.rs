use clap::Parser;
use std::io::{self, Write};
use geotrail::model::LocationRecord;
use geotrail::parser::{self, Command};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Interactive client for a geotrail server", long_about = None)]
struct Args {
    #[clap(long, env = "GEOTRAIL_URL", default_value = "http://127.0.0.1:3000")]
    server: String,
}

#[derive(Deserialize)]
struct PingReply {
    port: u16,
}

#[derive(Deserialize)]
struct LatestReply {
    latest: Option<LocationRecord>,
}

#[derive(Deserialize)]
struct HistoryReply {
    items: Vec<LocationRecord>,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let base = args.server.trim_end_matches('/').to_string();
    let client = Client::new();

    print_banner();

    match perform_ping(&client, &base).await {
        Ok(()) => println!("[\u{2713}] Connected to geotrail at {}!", base),
        Err(_) => {
            println!("[\u{2717}] Could not reach server at {}.", base);
            println!("    Start it with 'cargo run --bin geotrail' or pass --server.");
            return;
        }
    }
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("geotrail> ");
        if io::stdout().flush().is_err() { break; }
        buffer.clear();

        match stdin.read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() { continue; }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = execute_command(&client, &base, cmd).await {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                if buffer.trim_start().to_uppercase().starts_with("SEND") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'SEND u1 40.4 -3.7 ACC 10 VIA gps'");
                }
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   geotrail CLI v{} - Location Trail Client", env!("CARGO_PKG_VERSION"));
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. PING:     PING");
    println!("2. SEND:     SEND <user> <lat> <lon> [ACC <meters>] [VIA <provider>] [AT <epoch-ms>]");
    println!("3. LATEST:   LATEST <user>");
    println!("4. HISTORY:  HISTORY <user>");
    println!("5. EXIT:     Quit\n");
}

async fn execute_command(client: &Client, base: &str, cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Help => { print_help(); Ok(()) },
        Command::Ping => perform_ping(client, base).await,
        Command::Send { user_id, lat, lon, acc, provider, ts } => {
            let mut body = Map::new();
            body.insert("userId".into(), json!(user_id));
            body.insert("lat".into(), json!(lat));
            body.insert("lon".into(), json!(lon));
            if let Some(acc) = acc { body.insert("acc".into(), json!(acc)); }
            if let Some(provider) = provider { body.insert("provider".into(), json!(provider)); }
            if let Some(ts) = ts { body.insert("ts".into(), json!(ts)); }
            perform_send(client, base, Value::Object(body)).await
        },
        Command::Latest { user_id } => perform_latest(client, base, &user_id).await,
        Command::History { user_id } => perform_history(client, base, &user_id).await,
        Command::Exit => Ok(()),
    }
}

// --- NETWORK HANDLERS ---

async fn perform_ping(client: &Client, base: &str) -> Result<(), String> {
    let reply: PingReply = get_json(client, &format!("{}/api/ping", base), &[]).await?;
    println!("[\u{2713} OK] pong (port {})", reply.port);
    Ok(())
}

async fn perform_send(client: &Client, base: &str, body: Value) -> Result<(), String> {
    let resp = client
    .post(format!("{}/api/location", base))
    .json(&body)
    .send()
    .await
    .map_err(|e| e.to_string())?;

    if resp.status().is_success() {
        println!("[\u{2713} OK] Location saved");
        Ok(())
    } else {
        Err(error_message(resp).await)
    }
}

async fn perform_latest(client: &Client, base: &str, user_id: &str) -> Result<(), String> {
    let reply: LatestReply = get_json(client, &format!("{}/api/latest", base), &[("userId", user_id)]).await?;
    match reply.latest {
        Some(record) => println!("Latest for {}: {}", user_id, describe(&record)),
        None => println!("[\u{2717}] No locations for {}.", user_id),
    }
    Ok(())
}

async fn perform_history(client: &Client, base: &str, user_id: &str) -> Result<(), String> {
    let reply: HistoryReply = get_json(client, &format!("{}/api/locations", base), &[("userId", user_id)]).await?;
    println!("History for {} ({} fixes):", user_id, reply.items.len());
    for (i, record) in reply.items.iter().enumerate() {
        println!("  #{} | {}", i + 1, describe(record));
    }
    Ok(())
}

async fn get_json<T: for<'de> Deserialize<'de>>(client: &Client, url: &str, query: &[(&str, &str)]) -> Result<T, String> {
    let resp = client.get(url).query(query).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(error_message(resp).await);
    }
    resp.json::<T>().await.map_err(|e| e.to_string())
}

async fn error_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    match resp.json::<ErrorReply>().await {
        Ok(body) => format!("{} ({})", body.error, status),
        Err(_) => format!("Server responded with {}", status),
    }
}

fn describe(record: &LocationRecord) -> String {
    let acc = record.acc.map(|a| format!("±{}m", a)).unwrap_or_else(|| "±?".to_string());
    let provider = record.provider.as_deref().unwrap_or("unknown");
    format!("{}, {} {} via {} at {}", record.lat, record.lon, acc, provider, record.ts)
}
