//! Per-session topic subscriptions.
//!
//! Sessions start subscribed to [`Topic::State`]; clients may drop it and
//! pick it up again with control messages.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A topic a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    /// Gripper state snapshots.
    State,
}

impl Topic {
    /// Wire name of the topic.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "state" => Ok(Self::State),
            other => Err(format!("unknown topic: {other}")),
        }
    }
}

/// The topic set of a single session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionManager {
    topics: BTreeSet<Topic>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    /// Creates a set holding the default `state` topic.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: BTreeSet::from([Topic::State]),
        }
    }

    /// Parses topic names, failing on the first unknown one.
    ///
    /// # Errors
    ///
    /// Returns the reason naming the unknown topic.
    pub fn parse_topics(names: &[String]) -> Result<Vec<Topic>, String> {
        names.iter().map(|name| name.parse()).collect()
    }

    /// Adds topics to the set.
    pub fn subscribe(&mut self, topics: &[Topic]) {
        self.topics.extend(topics.iter().copied());
    }

    /// Removes topics from the set.
    pub fn unsubscribe(&mut self, topics: &[Topic]) {
        for topic in topics {
            self.topics.remove(topic);
        }
    }

    /// Returns `true` if `topic` is subscribed.
    #[must_use]
    pub fn matches(&self, topic: Topic) -> bool {
        self.topics.contains(&topic)
    }

    /// Topic names in a stable order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.topics.iter().map(|t| t.as_str().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_state() {
        let mgr = SubscriptionManager::new();
        assert!(mgr.matches(Topic::State));
        assert_eq!(mgr.names(), vec!["state".to_string()]);
    }

    #[test]
    fn unsubscribe_then_resubscribe() {
        let mut mgr = SubscriptionManager::new();
        mgr.unsubscribe(&[Topic::State]);
        assert!(!mgr.matches(Topic::State));
        assert!(mgr.names().is_empty());
        mgr.subscribe(&[Topic::State]);
        assert!(mgr.matches(Topic::State));
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let names = vec!["state".to_string(), "joints".to_string()];
        let result = SubscriptionManager::parse_topics(&names);
        assert_eq!(result, Err("unknown topic: joints".to_string()));
    }
}
