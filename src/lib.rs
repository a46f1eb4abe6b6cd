// src/lib.rs

// Import the top-level `courier` module.
pub mod courier;

// Re-exporting the submodules and key types at the crate root for easier
// external access.
pub use courier::{
    alert, channel, clients, config, context, error, heartbeat, processor, providers, queue,
    request, router, secrets, state, tenant,
};
pub use courier::{ChannelProcessor, IngressRouter};
