//! # Observability & Tracing
//!
//! [`setup_tracing`] installs the process-wide subscriber: structured, compact lines with
//! spans shown inline and the module prefix hidden (`with_target(false)`). Levels come
//! from `RUST_LOG`.
//!
//! ```bash
//! # Stage progress and component start-up
//! RUST_LOG=info microfab
//!
//! # Channel updates, probe results, full configuration dump
//! RUST_LOG=debug microfab
//!
//! # Only the protocol layer
//! RUST_LOG=microfab::protocol=trace microfab
//! ```
//!
//! With `RUST_LOG=info` a fresh bootstrap reads roughly:
//!
//! ```text
//! INFO Starting network domain=127-0-0-1.nip.io port=8080
//! INFO Created organization name="Org1" msp_id="Org1MSP"
//! INFO Starting components components=3
//! INFO launch_peer{org=Org1}: Process ready name="org1peer"
//! INFO create_and_join{channel=channel1}: Created and joined channel
//! INFO Saved state path=data/state.json
//! INFO Network started latency_ms=6210
//! ```
//!
//! Component process output never goes through the subscriber; each process writes to
//! its own file under `logs/`.

/// Installs the global subscriber. Call once, before the network is built.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
