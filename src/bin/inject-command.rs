//! Remote command injection utility
//!
//! Publishes an RPC request to a plain MQTT broker the way the telemetry
//! server would, so the actuator path can be exercised without one.
//!
//! ## Usage
//!
//! ```bash
//! # Ask the device to switch its output on
//! inject-command --broker-url localhost
//!
//! # Custom request id and body
//! inject-command --request-id 42 --body '{"method":"setState","params":"ON"}'
//! ```

use clap::Parser;
use device_agent::protocol::rpc_request_topic;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, timeout, Duration};

#[derive(Parser)]
#[command(
    name = "inject-command",
    about = "Inject an RPC request for a device agent listening on a local broker"
)]
struct Args {
    /// RPC request id, appended to the request topic
    #[arg(long, default_value_t = 1)]
    request_id: u32,

    /// Request body; any body containing ON triggers the actuator
    #[arg(long, default_value = r#"{"method":"setState","params":"ON"}"#)]
    body: String,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker_url: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    broker_port: u16,

    /// Broker username (device access token)
    #[arg(long, env = "DEVICE_ACCESS_TOKEN")]
    username: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let client_id = format!(
        "inject-command-{}",
        SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs()
    );
    let mut options = MqttOptions::new(client_id, &args.broker_url, args.broker_port);
    options.set_keep_alive(Duration::from_secs(30));
    if let Some(username) = &args.username {
        options.set_credentials(username, "");
    }

    let (client, mut eventloop) = AsyncClient::new(options, 10);

    println!("Connecting to MQTT broker {}:{}...", args.broker_url, args.broker_port);
    timeout(Duration::from_secs(10), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await??;

    let topic = rpc_request_topic(args.request_id);
    client
        .publish(topic.as_str(), QoS::AtLeastOnce, false, args.body.clone().into_bytes())
        .await?;

    // Drive the event loop until the publish is acknowledged
    let acked = timeout(Duration::from_secs(5), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match acked {
        Ok(Ok(())) => println!("✓ Injected {} on {}", args.body, topic),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => println!("✗ No acknowledgement for {topic} within 5s"),
    }

    client.disconnect().await?;
    sleep(Duration::from_millis(100)).await;
    Ok(())
}
