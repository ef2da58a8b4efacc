// firmata test application -- CLI tool for exercising the Firmata engine
// against real hardware, a network board, or a simulated board.
//
// Usage:
//   firmata-test-app --port /dev/ttyACM0 info
//   firmata-test-app --host 192.168.1.50 pins
//   firmata-test-app --mock pin-state 13
//   firmata-test-app --mock mode 13 output
//   firmata-test-app --port /dev/ttyACM0 write digital 13 1
//   firmata-test-app --port /dev/ttyACM0 write analog 9 128
//   firmata-test-app --mock monitor --duration 10
//   firmata-test-app --port /dev/ttyACM0 blink 13 --count 20
//
// Set RUST_LOG=firmata_engine=debug (or trace) to see protocol traffic.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use firmata::transports::DEFAULT_BAUD_RATE;
use firmata::{FirmataBuilder, FirmataClient, FirmataEvent, Pin, PinMode, Transport};
use firmata_test_harness::SimulatedBoard;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// firmata test application -- exercises a Firmata board from the command line.
#[derive(Parser)]
#[command(name = "firmata-test-app", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyACM0, COM3).
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Network board address (host or host:port, default port 3030).
    #[arg(long)]
    host: Option<String>,

    /// Talk to a simulated board instead of hardware.
    #[arg(long)]
    mock: bool,

    /// Discovery timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    discovery_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print firmware, protocol version and a pin summary.
    Info,

    /// List every pin with its supported modes and current state.
    Pins,

    /// Query one pin's mode and value from the board.
    PinState {
        pin: u8,
    },

    /// Set a pin's mode (input, output, analog, pwm, servo, i2c, pullup, ...).
    Mode {
        pin: u8,
        mode: String,
    },

    /// Write to a pin.
    Write {
        #[command(subcommand)]
        action: WriteAction,
    },

    /// Enable reporting and print events as they arrive.
    Monitor {
        /// Seconds to monitor (0 = until Ctrl-C).
        #[arg(long, default_value = "0")]
        duration: u64,
    },

    /// Set the analog sampling interval.
    Sampling {
        /// Interval in milliseconds.
        ms: u16,
    },

    /// Toggle a digital output and read its state back after each write.
    Blink {
        pin: u8,
        #[arg(long, default_value = "10")]
        count: u32,
        /// Milliseconds between toggles.
        #[arg(long, default_value = "250")]
        interval: u64,
    },

    /// Send a text message to the board.
    Say {
        text: String,
    },
}

#[derive(Subcommand)]
enum WriteAction {
    /// Drive a digital output (0 or 1).
    Digital { pin: u8, value: u8 },
    /// Write a PWM duty cycle or servo angle.
    Analog { pin: u8, value: u32 },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn format_modes(pin: &Pin) -> String {
    if pin.supported_modes.is_empty() {
        return "-".to_string();
    }
    pin.supported_modes
        .iter()
        .map(|c| format!("{}({})", c.mode, c.resolution))
        .collect::<Vec<_>>()
        .join(" ")
}

fn format_current(pin: &Pin) -> String {
    match pin.current_mode {
        Some(mode) => format!("{mode} = {}", pin.current_value),
        None => "-".to_string(),
    }
}

/// Wait up to `timeout` for the first event matching `pred`.
async fn wait_for_event(
    events: &mut broadcast::Receiver<FirmataEvent>,
    timeout: Duration,
    pred: impl Fn(&FirmataEvent) -> bool,
) -> Option<FirmataEvent> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) if pred(&event) => return Some(event),
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) | Err(_) => return None,
        }
    }
}

fn validate_options(cli: &Cli) -> Result<()> {
    let endpoints = [cli.port.is_some(), cli.host.is_some(), cli.mock]
        .iter()
        .filter(|set| **set)
        .count();
    match endpoints {
        0 => bail!("one of --port, --host or --mock is required"),
        1 => Ok(()),
        _ => bail!("--port, --host and --mock are mutually exclusive"),
    }
}

// ---------------------------------------------------------------------------
// Client construction
// ---------------------------------------------------------------------------

/// Connect to the board named on the command line and run discovery.
async fn create_client(cli: &Cli) -> Result<FirmataClient> {
    let builder = FirmataBuilder::new()
        .baud_rate(cli.baud)
        .discovery_timeout(Duration::from_millis(cli.discovery_timeout))
        .discover_on_connect(true);

    let client = if cli.mock {
        builder
            .build_with_transport(Box::new(SimulatedBoard::new()))
            .await
            .context("failed to start simulated board")?
    } else if let Some(port) = &cli.port {
        builder
            .serial_port(port)
            .build()
            .await
            .with_context(|| format!("failed to connect on {port}"))?
    } else if let Some(host) = &cli.host {
        builder
            .tcp_host(host)
            .build()
            .await
            .with_context(|| format!("failed to connect to {host}"))?
    } else {
        bail!("no board selected");
    };

    tracing::debug!(state = %client.state().await?, "board ready");
    Ok(client)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_info(client: &FirmataClient) -> Result<()> {
    let mut events = client.subscribe()?;
    client.report_version().await?;
    client.report_firmware().await?;

    // The version answer comes first; the firmware answer follows it.
    wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, FirmataEvent::FirmwareReported(_))
    })
    .await;

    let snapshot = client.snapshot().await?;

    println!("Board Information");
    match &snapshot.firmware {
        Some(fw) => println!("  Firmware:       {fw}"),
        None => println!("  Firmware:       (no answer)"),
    }
    match snapshot.protocol_version {
        Some(v) => println!("  Protocol:       {v}"),
        None => println!("  Protocol:       (no answer)"),
    }
    println!("  State:          {}", snapshot.state);
    println!("  Pins:           {}", snapshot.pins.len());

    let analog: Vec<String> = snapshot
        .pins
        .iter()
        .filter_map(|p| p.analog_channel.map(|ch| format!("A{ch}={}", p.index)))
        .collect();
    if !analog.is_empty() {
        println!("  Analog inputs:  {}", analog.join(", "));
    }

    let mut modes = BTreeSet::new();
    for pin in &snapshot.pins {
        for cap in &pin.supported_modes {
            modes.insert(cap.mode.to_string());
        }
    }
    println!(
        "  Modes:          {}",
        modes.into_iter().collect::<Vec<_>>().join(", ")
    );
    Ok(())
}

async fn cmd_pins(client: &FirmataClient) -> Result<()> {
    let pins = client.pins().await?;
    println!("{:>4}  {:>6}  {:<18}  Modes", "Pin", "Analog", "Current");
    println!("{:-<4}  {:-<6}  {:-<18}  {:-<40}", "", "", "", "");
    for pin in &pins {
        let analog = pin
            .analog_channel
            .map(|ch| format!("A{ch}"))
            .unwrap_or_default();
        println!(
            "{:>4}  {:>6}  {:<18}  {}",
            pin.index,
            analog,
            format_current(pin),
            format_modes(pin)
        );
    }
    Ok(())
}

async fn cmd_pin_state(client: &FirmataClient, pin: u8) -> Result<()> {
    let mut events = client.subscribe()?;
    client.pin_state_query(pin).await?;

    // No event means the board's answer matched what we already knew.
    wait_for_event(&mut events, Duration::from_secs(1), |e| {
        *e == FirmataEvent::PinChanged { pin }
    })
    .await;

    let state = client
        .pin(pin)
        .await?
        .with_context(|| format!("pin {pin} not reported by the board"))?;
    println!("Pin {pin}: {}", format_current(&state));
    Ok(())
}

async fn cmd_mode(client: &FirmataClient, pin: u8, mode: &str) -> Result<()> {
    let mode: PinMode = mode.parse()?;
    client.set_pin_mode(pin, mode).await?;
    println!("Pin {pin} set to {mode}");
    Ok(())
}

async fn cmd_write_digital(client: &FirmataClient, pin: u8, value: u8) -> Result<()> {
    let high = match value {
        0 => false,
        1 => true,
        other => bail!("digital value must be 0 or 1, got {other}"),
    };
    client.digital_write(pin, high).await?;
    println!("Pin {pin} -> {}", if high { "HIGH" } else { "LOW" });
    Ok(())
}

async fn cmd_write_analog(client: &FirmataClient, pin: u8, value: u32) -> Result<()> {
    client.analog_write(pin, value).await?;
    println!("Pin {pin} -> {value}");
    Ok(())
}

async fn cmd_monitor(client: &FirmataClient, duration_secs: u64) -> Result<()> {
    let mut event_rx = client.subscribe()?;

    let pins = client.pins().await?;
    let channels: BTreeSet<u8> = pins.iter().filter_map(|p| p.analog_channel).collect();
    for channel in &channels {
        client.report_analog(*channel, true).await?;
    }
    let ports: BTreeSet<u8> = pins.iter().map(|p| p.port()).collect();
    for port in &ports {
        client.report_digital(*port, true).await?;
    }

    println!(
        "Monitoring {} analog channel(s) and {} port(s) (Ctrl-C to stop)...",
        channels.len(),
        ports.len()
    );

    let deadline = if duration_secs > 0 {
        Some(Instant::now() + Duration::from_secs(duration_secs))
    } else {
        None
    };

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        match tokio::time::timeout(timeout, event_rx.recv()).await {
            Ok(Ok(FirmataEvent::PinChanged { pin })) => {
                if let Some(state) = client.pin(pin).await? {
                    println!("[pin {pin:>3}] {}", format_current(&state));
                }
            }
            Ok(Ok(event)) => {
                println!("[event] {event:?}");
            }
            Ok(Err(RecvError::Lagged(n))) => {
                println!("[warning] missed {n} events (consumer too slow)");
            }
            Ok(Err(RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                }
                break;
            }
        }
    }

    for channel in &channels {
        client.report_analog(*channel, false).await.ok();
    }
    for port in &ports {
        client.report_digital(*port, false).await.ok();
    }
    Ok(())
}

async fn cmd_sampling(client: &FirmataClient, ms: u16) -> Result<()> {
    client.set_sampling_interval_ms(ms).await?;
    println!("Sampling interval set to {ms} ms");
    Ok(())
}

async fn cmd_blink(client: &FirmataClient, pin: u8, count: u32, interval_ms: u64) -> Result<()> {
    client.set_pin_mode(pin, PinMode::Output).await?;
    let mut events = client.subscribe()?;

    let mut failures = 0u32;
    let start = Instant::now();
    let mut high = false;

    for i in 1..=count {
        high = !high;
        client.digital_write(pin, high).await?;
        client.pin_state_query(pin).await?;

        let expected = high as u32;
        let readback = wait_for_event(&mut events, Duration::from_millis(500), |e| {
            *e == FirmataEvent::PinChanged { pin }
        })
        .await;
        let value = client.pin(pin).await?.map(|p| p.current_value);
        if value != Some(expected) {
            eprintln!("[{i}/{count}] wrote {expected}, board reports {value:?}");
            failures += 1;
        } else if readback.is_none() {
            tracing::debug!(pin, "pin state unchanged by query");
        }

        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    }

    client.digital_write(pin, false).await?;

    println!();
    println!("Results:");
    println!("  Toggles:        {count}");
    println!("  Failures:       {failures}");
    println!("  Elapsed:        {:.3} s", start.elapsed().as_secs_f64());

    if failures > 0 {
        bail!("{failures} out of {count} toggles did not read back");
    }
    Ok(())
}

async fn cmd_say(client: &FirmataClient, text: &str) -> Result<()> {
    client.send_string(text).await?;
    println!("Sent {} characters", text.chars().count());
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    validate_options(&cli)?;

    let client = create_client(&cli).await?;

    let result = match &cli.command {
        Command::Info => cmd_info(&client).await,
        Command::Pins => cmd_pins(&client).await,
        Command::PinState { pin } => cmd_pin_state(&client, *pin).await,
        Command::Mode { pin, mode } => cmd_mode(&client, *pin, mode).await,
        Command::Write { action } => match action {
            WriteAction::Digital { pin, value } => cmd_write_digital(&client, *pin, *value).await,
            WriteAction::Analog { pin, value } => cmd_write_analog(&client, *pin, *value).await,
        },
        Command::Monitor { duration } => cmd_monitor(&client, *duration).await,
        Command::Sampling { ms } => cmd_sampling(&client, *ms).await,
        Command::Blink {
            pin,
            count,
            interval,
        } => cmd_blink(&client, *pin, *count, *interval).await,
        Command::Say { text } => cmd_say(&client, text).await,
    };

    if let Ok(mut transport) = client.close().await {
        transport.close().await.ok();
    }
    result
}
