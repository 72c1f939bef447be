// error.rs — Fatal internal errors of the channel passes
//
// These signal a violated structural invariant (a compiler defect, not a
// property of the user's program). They abort the pipeline; recoverable
// conditions are reported as warning diagnostics instead (see diag.rs).

/// A broken invariant detected while analyzing or rewriting channels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// One (channel, direction) would be hoisted to two different loops.
    #[error(
        "channel '{channel}' ({direction}) is promoted at two different loops: \
         '{first}' and '{second}'"
    )]
    ConflictingPromotionLoop {
        channel: String,
        direction: &'static str,
        first: String,
        second: String,
    },

    /// A planned bulk transfer has no loop to attach to.
    #[error("bulk transfer of '{channel}' found no loop '{loop_name}' to attach to")]
    UnplacedTransfer { channel: String, loop_name: String },

    /// A write to a combined channel is not listed in its group.
    #[error("write to '{channel}' has no field in combined channel '{combined}'")]
    MissingGroupMember { channel: String, combined: String },

    /// A write to a combined channel is nested inside an expression.
    #[error("write to combined channel member '{channel}' is not a statement")]
    UnplacedWrite { channel: String },

    /// The per-compilation struct limit is reached.
    #[error("too many generated struct types (limit {limit})")]
    TooManyStructs { limit: usize },
}
