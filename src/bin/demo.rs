//! End-to-end walkthrough against the in-process simulator
//!
//! Starts a controller double on an ephemeral port, drives the full client
//! life cycle against it and prints what comes back. RUST_LOG=debug shows
//! the frame traffic.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use adam5000::{
    Adam5000Client, Adam5000Config, Adam5000Simulator, ChannelAddress, ChannelValue, ParamTable,
    SlotPattern, SlotType,
};

const PARAMS_YAML: &str = r#"
- name: boiler_temp
  slot_type: analog
  slot: 0
  channel: 3
  value_range: 200.0
  digital_max: 4095.0
  unit: degC
- name: pump_running
  slot_type: digital
  slot: 4
  channel: 0
  value_range: 1.0
  digital_max: 1.0
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Controller double with a warm boiler and a running pump
    let simulator = Adam5000Simulator::new();
    simulator.set_analog(3, 2457).await;
    simulator.set_digital(4, 0, true).await;
    let addr = simulator.start(0).await?;

    let config = Adam5000Config {
        host: addr.ip().to_string(),
        port: addr.port(),
        poll_interval: Duration::from_millis(100),
        ..Default::default()
    };
    let client = Adam5000Client::new(config)?;

    anyhow::ensure!(client.connect().await, "simulator refused the connection");
    client
        .set_param_table(ParamTable::from_yaml_str(PARAMS_YAML)?)
        .await;

    let mut updates = client.subscribe();
    client.set_reading_state(true).await;

    for _ in 0..3 {
        let update = updates.recv().await?;
        let mut values: Vec<_> = update.values.iter().collect();
        values.sort_by(|a, b| a.0.cmp(b.0));
        let line: Vec<String> = values
            .iter()
            .map(|(name, value)| format!("{name}={value:.1}"))
            .collect();
        println!("tick {:>2}: {}", update.tick, line.join("  "));
    }

    // Writes issued while polling runs are queued and each takes one tick
    let setpoint = ChannelAddress::new(SlotType::Analog, 1, 2)?;
    client.set_value(setpoint, ChannelValue::Analog(2048)).await?;

    let mut coils = vec![false; 16];
    coils[0] = true;
    coils[5] = true;
    client
        .set_slot_pattern(4, &SlotPattern::Digital(coils))
        .await?;

    while client.is_busy().await {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    // One more full poll so the cache reflects the writes
    tokio::time::sleep(Duration::from_millis(300)).await;

    let readback = client.get_value(setpoint).await?;
    println!("readback A1.2 = {readback}");
    let valve = client
        .get_value(ChannelAddress::new(SlotType::Digital, 4, 5)?)
        .await?;
    println!("readback D4.5 = {valve}");

    let status = client.status().await;
    println!(
        "connection={:?} polling={:?} ticks={} queue={} last_error={:?}",
        status.connection_state,
        status.polling_state,
        status.ticks,
        status.queue_depth,
        status.last_error,
    );
    let stats = client.transport_stats().await;
    println!(
        "requests={} responses={} errors={}",
        stats.requests_sent, stats.responses_received, stats.errors
    );

    client.disconnect().await;
    Ok(())
}
