//! `serialio-runtime` – routers, the launcher, and process supervision.
//!
//! # Modules
//!
//! - [`router`] – [`Router`]: one serial device bridged to its
//!   `serial_ports/<device>/{read,write,command}` channels.
//! - [`launcher`] – [`Launcher`]: opens a fleet of routers, maintains the
//!   registry set, and refreshes the service name while any router lives.
//! - [`supervisor`] – [`supervise`]: fixed-delay restart of failed attempts.
//! - [`telemetry`] – [`init_tracing`]: console logging with optional OTLP
//!   span export.

pub mod launcher;
pub mod router;
pub mod supervisor;
pub mod telemetry;

pub use launcher::{DEFAULT_SERVICE_NAME, Launcher, LauncherConfig};
pub use router::{Router, RouterContext, RouterEvent, RouterState};
pub use supervisor::{RESTART_DELAY, supervise};
pub use telemetry::{TracerProviderGuard, init_tracing};
