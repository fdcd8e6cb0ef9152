//! Built-in scan modules.
//!
//! Each module satisfies the [`ScanModule`](crate::ScanModule) contract:
//! write artifacts/findings through the job context, return the count of
//! actionable results, attach an explicit timeout to every external call,
//! and keep internal fan-out behind the shared limiter. Heavyweight
//! scanners plug in through the same trait from their own crates.

pub mod crtsh;
pub mod http_probe;
pub mod port_sweep;
pub mod shodan;

pub use crtsh::CrtShSubdomainsModule;
pub use http_probe::HttpProbeModule;
pub use port_sweep::PortSweepModule;
pub use shodan::ShodanDnsModule;
