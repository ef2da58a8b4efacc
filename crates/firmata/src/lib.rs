//! # firmata -- Async host library for Firmata boards
//!
//! `firmata` talks to microcontrollers running a Firmata sketch
//! (StandardFirmata, StandardFirmataPlus, StandardFirmataWiFi, ...) over a
//! serial port or TCP. It discovers the board's pins and what each one can
//! do, keeps a live model of their modes and values, and publishes every
//! change as an event.
//!
//! ## Quick Start
//!
//! ```no_run
//! use firmata::{FirmataBuilder, PinMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let board = FirmataBuilder::new()
//!         .serial_port("/dev/ttyACM0")
//!         .discover_on_connect(true)
//!         .build()
//!         .await?;
//!
//!     board.set_pin_mode(13, PinMode::Output).await?;
//!     board.digital_write(13, true).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                  | Purpose                                           |
//! |------------------------|---------------------------------------------------|
//! | `firmata-core`         | [`Transport`] trait, [`FirmataEvent`], types, errors |
//! | `firmata-transport`    | Serial and TCP transports                         |
//! | `firmata-engine`       | Frame codec, pin model, session, async client     |
//! | **`firmata`**          | This facade crate -- re-exports everything        |
//!
//! ## Event Subscription
//!
//! ```no_run
//! use firmata::{FirmataClient, FirmataEvent};
//! # async fn example(board: &FirmataClient) -> firmata::Result<()> {
//! let mut events = board.subscribe()?;
//! while let Ok(event) = events.recv().await {
//!     if let FirmataEvent::PinChanged { pin } = event {
//!         println!("pin {pin} changed: {:?}", board.pin(pin).await?);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub use firmata_core::*;

pub use firmata_engine::{
    Command, Decoder, FirmataBuilder, FirmataClient, Message, PinTable, Session, SessionSnapshot,
};

/// Wire-level building blocks: frame codec and command encoders.
pub mod protocol {
    pub use firmata_engine::codec;
    pub use firmata_engine::commands;
}

/// Serial and TCP transports.
pub mod transports {
    pub use firmata_transport::*;
}
