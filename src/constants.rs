//! Transport-wide constants for hostlink.
//!
//! Centralizes the magic numbers shared by the listener (plugin) side and
//! the poller (daemon) side. Both sides are built and shipped together, so
//! these values never need to be negotiated at runtime.
//!
//! # Categories
//!
//! - **Ports**: one fixed port per protocol generation
//! - **Sockets**: listen backlog and connect bounds
//! - **Framing**: header width
//! - **Polling**: daemon tick cadence

use std::net::Ipv4Addr;
use std::time::Duration;

// ============================================================================
// Ports
// ============================================================================

/// Port used by the legacy (pid-only) protocol generation.
pub const LEGACY_PORT: u16 = 24638;

/// Port used by the current protocol generation.
///
/// A new generation always moves to a new port, so a daemon built against
/// one layout can never decode messages written in another.
pub const CURRENT_PORT: u16 = 24639;

/// Default address both roles use. The transport is local-machine only.
pub const DEFAULT_ADDRESS: Ipv4Addr = Ipv4Addr::LOCALHOST;

// ============================================================================
// Sockets
// ============================================================================

/// Listen backlog for the plugin-side socket.
///
/// Only one peer is ever tracked; the second slot lets a reconnecting daemon
/// queue up while a stale peer is still being torn down.
pub const LISTEN_BACKLOG: i32 = 2;

/// Upper bound on a single poller connect attempt.
///
/// Loopback connects either succeed or are refused immediately; the bound
/// only matters if the host firewall silently drops the SYN.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

// ============================================================================
// Framing
// ============================================================================

/// Width in bytes of the message-kind header (a native-endian `u32`).
pub const HEADER_LEN: usize = 4;

/// Header value reserved for "no message" in every protocol generation.
pub const RESERVED_TAG: u32 = 0;

// ============================================================================
// Polling
// ============================================================================

/// Default delay between daemon ticks.
///
/// 10ms keeps notification latency well under a frame of UI while leaving
/// the daemon idle almost all of the time.
pub const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// How long `hostlink emit` waits for a daemon to attach before giving up.
pub const EMIT_ATTACH_TIMEOUT: Duration = Duration::from_secs(10);
