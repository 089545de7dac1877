//! Contract Universe Adapters

mod static_universe;

pub use static_universe::StaticContractUniverse;
