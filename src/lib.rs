//! Pumpgate - trading gateway between the PumpAmp relay and trading venues.
//!
//! A long-running process that receives trade/cancel/pause/resume commands
//! from the relay over a persistent WebSocket, routes them to venue
//! connectors, tracks orders and positions, and streams lifecycle reports
//! back. A parallel ingest path feeds public signals through a rule-based
//! strategy engine that can synthesize trades, including two-legged
//! arbitrage pairs.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── protocol      # Wire schema: commands, reports, signals
//! ├── connector     # VenueConnector contract
//! ├── position      # Position tracker
//! ├── router        # Order router + lifecycle state machine
//! ├── relay/        # Relay client: pairing, heartbeat, reconnect
//! ├── signal        # Public signal stream consumer
//! ├── strategy/     # Rule matching, risk gates, command synthesis
//! ├── gateway       # Orchestrator: wiring, state sync, shutdown
//! └── testkit/      # Simulators for tests (testkit feature)
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod position;
pub mod protocol;
pub mod relay;
pub mod router;
pub mod signal;
pub mod strategy;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
