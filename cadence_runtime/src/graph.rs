//! The static reactor graph.
//!
//! The graph is assembled once, before execution, from code-generator-built
//! descriptors: reactors with their state, reactions with levels and chain
//! masks, triggers, and ports. Arenas own every descriptor; components refer
//! to each other by copyable keys, so the graph is a DAG with no reference
//! cycles.

use std::sync::Mutex;

use crate::{
    trigger::TriggerKind, Level, PortDesc, PortKey, Reaction, ReactionKey, ReactorKey,
    ReactorState, Trigger, TriggerKey,
};
use cadence_arena::Arena;

/// A reactor: a name and the state its reactions mutate.
///
/// The state sits behind its own mutex, locked only while one of the
/// reactor's reactions runs; chain discipline keeps the lock uncontended.
pub(crate) struct ReactorSlot {
    pub name: String,
    pub state: Mutex<Box<dyn ReactorState>>,
}

impl std::fmt::Debug for ReactorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor").field("name", &self.name).finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("reaction {0} bound before insertion")]
    UnknownReaction(ReactionKey),

    #[error("trigger {0} bound before insertion")]
    UnknownTrigger(TriggerKey),

    #[error("port {0} bound before insertion")]
    UnknownPort(PortKey),

    #[error("trigger {trigger} lists reaction {reaction} at {listed}, but its level is {actual}")]
    LevelMismatch {
        trigger: TriggerKey,
        reaction: ReactionKey,
        listed: Level,
        actual: Level,
    },

    #[error("port {port} lists reaction {reaction} at {listed}, but its level is {actual}")]
    PortLevelMismatch {
        port: PortKey,
        reaction: ReactionKey,
        listed: Level,
        actual: Level,
    },
}

/// The resolved, flattened runtime graph.
#[derive(Debug, Default)]
pub struct ReactorGraph {
    pub(crate) reactors: Arena<ReactorKey, ReactorSlot>,
    pub(crate) reactions: Arena<ReactionKey, Reaction>,
    pub(crate) triggers: Arena<TriggerKey, Trigger>,
    pub(crate) ports: Arena<PortKey, PortDesc>,
}

impl ReactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_reactor<S: ReactorState>(&mut self, name: &str, state: S) -> ReactorKey {
        self.reactors.insert(ReactorSlot {
            name: name.into(),
            state: Mutex::new(Box::new(state)),
        })
    }

    pub fn insert_reaction(&mut self, reaction: Reaction) -> ReactionKey {
        self.reactions.insert(reaction)
    }

    pub fn insert_trigger(&mut self, trigger: Trigger) -> TriggerKey {
        self.triggers.insert(trigger)
    }

    pub fn insert_port(&mut self, port: PortDesc) -> PortKey {
        self.ports.insert(port)
    }

    /// List `reaction` among those enabled when `trigger` fires.
    pub fn bind_trigger(
        &mut self,
        trigger: TriggerKey,
        reaction: ReactionKey,
    ) -> Result<(), GraphError> {
        let level = self
            .reactions
            .get(reaction)
            .ok_or(GraphError::UnknownReaction(reaction))?
            .level;
        self.triggers
            .get_mut(trigger)
            .ok_or(GraphError::UnknownTrigger(trigger))?
            .reactions
            .push((level, reaction));
        Ok(())
    }

    /// List `reaction` among those triggered when `port` becomes present.
    pub fn bind_port(&mut self, port: PortKey, reaction: ReactionKey) -> Result<(), GraphError> {
        let level = self
            .reactions
            .get(reaction)
            .ok_or(GraphError::UnknownReaction(reaction))?
            .level;
        self.ports
            .get_mut(port)
            .ok_or(GraphError::UnknownPort(port))?
            .downstream
            .push((level, reaction));
        Ok(())
    }

    /// Record that `port` feeds `count` destinations (token fan-out).
    pub fn set_port_destinations(
        &mut self,
        port: PortKey,
        count: usize,
    ) -> Result<(), GraphError> {
        self.ports
            .get_mut(port)
            .ok_or(GraphError::UnknownPort(port))?
            .num_destinations = count;
        Ok(())
    }

    /// Attach initial payload hooks to a port.
    pub fn set_port_hooks(
        &mut self,
        port: PortKey,
        destructor: Option<crate::token::Destructor>,
        copier: Option<crate::token::Copier>,
    ) -> Result<(), GraphError> {
        let desc = self
            .ports
            .get_mut(port)
            .ok_or(GraphError::UnknownPort(port))?;
        desc.destructor = destructor;
        desc.copier = copier;
        Ok(())
    }

    pub fn reactor_name(&self, key: ReactorKey) -> &str {
        &self.reactors[key].name
    }

    pub fn reaction(&self, key: ReactionKey) -> &Reaction {
        &self.reactions[key]
    }

    pub fn trigger(&self, key: TriggerKey) -> &Trigger {
        &self.triggers[key]
    }

    pub fn port(&self, key: PortKey) -> &PortDesc {
        &self.ports[key]
    }

    /// The highest reaction level in the graph.
    pub fn max_level(&self) -> Level {
        self.reactions
            .values()
            .map(|r| r.level)
            .max()
            .unwrap_or_default()
    }

    pub(crate) fn triggers_of_kind<'a>(
        &'a self,
        pred: impl Fn(&TriggerKind) -> bool + Copy + 'a,
    ) -> impl Iterator<Item = TriggerKey> + 'a {
        self.triggers
            .iter()
            .filter(move |(_, t)| pred(&t.kind))
            .map(|(k, _)| k)
    }

    /// Cross-check the assembled graph before execution.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (trigger_key, trigger) in self.triggers.iter() {
            for &(listed, reaction_key) in &trigger.reactions {
                let reaction = self
                    .reactions
                    .get(reaction_key)
                    .ok_or(GraphError::UnknownReaction(reaction_key))?;
                if reaction.level != listed {
                    return Err(GraphError::LevelMismatch {
                        trigger: trigger_key,
                        reaction: reaction_key,
                        listed,
                        actual: reaction.level,
                    });
                }
            }
            if !self.reactors.contains(trigger.reactor) {
                return Err(GraphError::UnknownTrigger(trigger_key));
            }
        }
        for (port_key, port) in self.ports.iter() {
            for &(listed, reaction_key) in &port.downstream {
                let reaction = self
                    .reactions
                    .get(reaction_key)
                    .ok_or(GraphError::UnknownReaction(reaction_key))?;
                if reaction.level != listed {
                    return Err(GraphError::PortLevelMismatch {
                        port: port_key,
                        reaction: reaction_key,
                        listed,
                        actual: reaction.level,
                    });
                }
            }
        }
        Ok(())
    }
}
