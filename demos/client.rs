//! Simple demo client for the authwire daemon.
//!
//! Run with: cargo run --example client [HOST:PORT]
//!
//! The token is read from AUTHWIRE_TOKEN.
//!
//! Tests:
//! 1. ping - Health check
//! 2. echo - Body comes back unchanged
//! 3. stats - Connection counters
//! 4. Unknown action test
//! 5. Bad token test

use std::env;
use std::time::Duration;

use serde_json::json;

use authwire::client::{Client, Request};
use authwire::config::ClientConfig;
use authwire::protocol::Body;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== authwire Demo Client ===\n");

    let address = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:7777".to_string());
    let (host, port) = address
        .rsplit_once(':')
        .ok_or("address must be HOST:PORT")?;
    let token = env::var("AUTHWIRE_TOKEN").map_err(|_| "AUTHWIRE_TOKEN is not set")?;

    let config = ClientConfig::new(host, port.parse()?, token).with_timeout(Duration::from_secs(5));
    let client = Client::new(config)?;

    // Test 1: Ping
    println!("Test 1: ping");
    let response = client.request("ping", Body::new()).await?;
    println!("Response: {}\n", serde_json::to_string_pretty(&response)?);

    // Tests 2-4 share one connection
    let mut connection = client.connect().await?;

    println!("Test 2: echo");
    let body = match json!({"value": "hi", "nested": {"list": [1, 2, 3]}}) {
        serde_json::Value::Object(map) => map,
        _ => Body::new(),
    };
    let response = connection.request("echo", body).await?;
    println!("Response: {}\n", serde_json::to_string_pretty(&response)?);

    println!("Test 3: stats");
    match connection.request("stats", Body::new()).await {
        Ok(response) => println!("Response: {}\n", serde_json::to_string_pretty(&response)?),
        Err(e) => println!("Error: {}\n", e),
    }

    println!("Test 4: unknown action (should fail)");
    match connection.request("no.such.action", Body::new()).await {
        Ok(response) => println!("Unexpected success: {:?}\n", response),
        Err(e) => println!("Error: {}\n", e),
    }
    connection.close().await;

    // Test 5: Bad token
    println!("Test 5: bad token (should fail and close)");
    match client.send(Request::new("ping").token("not-the-token")).await {
        Ok(response) => println!("Unexpected success: {:?}\n", response),
        Err(e) => println!("Error: {}\n", e),
    }

    println!("=== Done ===");
    Ok(())
}
