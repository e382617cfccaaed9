//! External admission control for TCP and UDP connections.
//!
//! # Data Flow
//! ```text
//! Config snapshot (needles.<name>)
//!     → resolver.rs (validate, defaults, TLS material)
//!     → manager.rs (name → BasicNeedle, one per generation)
//!
//! Per connection (tcp/, udp/ adapters):
//!     Manager::get_needle(name, metadata?)
//!         → with_meta.rs (attach static metadata)
//!     → Needle::new_*_criteria(remote, local)
//!     → Needle::decide(criteria)
//!         → client/ (bounded RPC) → Loaded | Error | Timeout
//!         → policy.rs (onError / onTimeout)
//!     → DecisionWrapper (accept | reject)
//!
//! Connection closed:
//!     → Needle::on_conn_close → notifier.rs (bounded, best-effort)
//! ```
//!
//! # Design Decisions
//! - The engine decides binary admission only; nothing is cached
//! - Configuration errors disable one needle, never the whole build
//! - Remote failures resolve through policy, never as hard errors

pub mod addr;
pub mod client;
pub mod decision;
pub mod manager;
pub mod needle;
pub mod notifier;
pub mod policy;
pub mod resolver;
pub mod with_meta;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{DecisionClient, DecisionCriteria, DecisionResponse};
pub use decision::DecisionWrapper;
pub use manager::{Manager, NeedleInfo, NeedleStatus};
pub use needle::{BasicNeedle, CloseGuard, Needle, NeedleError};
pub use notifier::CloseNotifier;
pub use policy::{DecisionRef, Policy};
pub use resolver::{NeedleResolver, ResolveError};
pub use with_meta::NeedleWithMeta;
