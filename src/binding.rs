//! Physical channel to stream registry mapping

use crate::mixer::StreamRegistry;

/// Registry index controlled by `channel`, or `None` when the channel is inert
pub fn bind(channel: usize, registry: &StreamRegistry) -> Option<usize> {
    (channel < registry.len()).then_some(channel)
}
