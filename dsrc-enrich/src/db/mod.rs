//! Table access for dsrc-enrich

pub mod circuits;
pub mod devices;
pub mod enriched;
pub mod overrides;
pub mod runs;
