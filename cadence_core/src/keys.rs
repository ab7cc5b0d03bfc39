//! Keys naming the components of the static reactor graph.

cadence_arena::key_type! {
    /// Key for a reactor and its state.
    pub ReactorKey
}

cadence_arena::key_type! {
    /// Key for a reaction.
    pub ReactionKey
}

cadence_arena::key_type! {
    /// Key for a schedulable trigger (action or timer).
    pub TriggerKey
}

cadence_arena::key_type! {
    /// Key for a port, unique within a reactor graph.
    pub PortKey
}

cadence_arena::key_type! {
    /// Key for a token slot in the payload pool.
    pub TokenKey
}
