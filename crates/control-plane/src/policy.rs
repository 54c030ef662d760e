use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use thiserror::Error;

use crate::local_cache::CacheSnapshot;
use crate::model::{AuthzRequest, Condition, Decision, Effect, Matcher, Policy, RequestContext};

const PATTERN_CACHE_LIMIT: usize = 4096;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("unknown secret: {0}")]
    UnknownSecret(String),
}

/// Compiled regexes keyed by source pattern. Invalid patterns are cached as
/// `None` so they are not recompiled on every request.
#[derive(Default)]
struct PatternCache {
    compiled: RwLock<HashMap<String, Option<Arc<Regex>>>>,
}

impl PatternCache {
    fn get(&self, pattern: &str) -> Option<Arc<Regex>> {
        if let Some(entry) = self.compiled.read().get(pattern) {
            return entry.clone();
        }
        let compiled = RegexBuilder::new(&format!("^(?:{pattern})$"))
            .size_limit(1 << 20)
            .build()
            .ok()
            .map(Arc::new);
        let mut cache = self.compiled.write();
        if cache.len() >= PATTERN_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(pattern.to_string(), compiled.clone());
        compiled
    }
}

struct Hit<'a> {
    policy: &'a Policy,
    index: usize,
}

impl Hit<'_> {
    fn statement_label(&self) -> String {
        self.policy.document.statements[self.index]
            .sid
            .clone()
            .unwrap_or_else(|| format!("#{}", self.index))
    }

    fn into_decision(self, allowed: bool) -> Decision {
        let statement = self.statement_label();
        let verb = if allowed { "allowed" } else { "denied" };
        Decision {
            allowed,
            reason: format!(
                "{} by policy {} statement {}",
                verb, self.policy.id, statement
            ),
            policy_id: Some(self.policy.id.clone()),
            statement: Some(statement),
        }
    }
}

/// Deny-overrides, default-deny evaluator over a snapshot.
#[derive(Default)]
pub struct PolicyEngine {
    patterns: PatternCache,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &self,
        snapshot: &CacheSnapshot,
        request: &AuthzRequest,
    ) -> Result<Decision, EvaluationError> {
        let secret = snapshot
            .secret(&request.secret_id)
            .ok_or_else(|| EvaluationError::UnknownSecret(request.secret_id.clone()))?;
        Ok(self.evaluate_policies(snapshot.policies_for(&secret.owner), request))
    }

    pub fn evaluate_policies(&self, policies: &[Policy], request: &AuthzRequest) -> Decision {
        if policies.is_empty() {
            return Decision::deny("no policy");
        }

        let mut first_allow: Option<Hit<'_>> = None;
        for policy in policies {
            for (index, statement) in policy.document.statements.iter().enumerate() {
                let matched = self.any_matches(&statement.actions, &request.action)
                    && self.any_matches(&statement.resources, &request.resource)
                    && statement
                        .conditions
                        .iter()
                        .all(|condition| self.condition_holds(condition, &request.context));
                if !matched {
                    continue;
                }
                match statement.effect {
                    Effect::Deny => return Hit { policy, index }.into_decision(false),
                    Effect::Allow => {
                        if first_allow.is_none() {
                            first_allow = Some(Hit { policy, index });
                        }
                    }
                }
            }
        }

        match first_allow {
            Some(hit) => hit.into_decision(true),
            None => Decision::deny("no matching policy"),
        }
    }

    fn any_matches(&self, matchers: &[Matcher], value: &str) -> bool {
        matchers.iter().any(|matcher| self.matches(matcher, value))
    }

    fn matches(&self, matcher: &Matcher, value: &str) -> bool {
        match matcher {
            Matcher::Any => true,
            Matcher::Exact(expected) => expected == value,
            Matcher::Prefix(prefix) => value.starts_with(prefix.as_str()),
            Matcher::Pattern(pattern) => self
                .patterns
                .get(pattern)
                .map(|regex| regex.is_match(value))
                .unwrap_or(false),
        }
    }

    fn condition_holds(&self, condition: &Condition, context: &RequestContext) -> bool {
        match condition {
            Condition::Equals { key, value } => {
                context_string(context, key).is_some_and(|actual| &actual == value)
            }
            Condition::NotEquals { key, value } => {
                context_string(context, key).is_some_and(|actual| &actual != value)
            }
            Condition::In { key, values } => {
                context_string(context, key).is_some_and(|actual| values.contains(&actual))
            }
            Condition::NotIn { key, values } => {
                context_string(context, key).is_some_and(|actual| !values.contains(&actual))
            }
            Condition::Matches { key, pattern } => context_string(context, key)
                .zip(self.patterns.get(pattern))
                .is_some_and(|(actual, regex)| regex.is_match(&actual)),
            Condition::Cidr { key, cidr } => context_string(context, key)
                .is_some_and(|actual| ip_in_cidr(&actual, cidr)),
            Condition::Bool { key, value } => {
                matches!(context.get(key), Some(Value::Bool(actual)) if actual == value)
            }
        }
    }
}

fn context_string(context: &RequestContext, key: &str) -> Option<String> {
    match context.get(key)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

fn ip_in_cidr(addr: &str, cidr: &str) -> bool {
    let Some((network, prefix)) = cidr.split_once('/') else {
        return false;
    };
    let (Ok(addr), Ok(network), Ok(prefix)) = (
        addr.trim().parse::<IpAddr>(),
        network.trim().parse::<IpAddr>(),
        prefix.trim().parse::<u32>(),
    ) else {
        return false;
    };
    match (addr, network) {
        (IpAddr::V4(addr), IpAddr::V4(network)) if prefix <= 32 => {
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            u32::from(addr) & mask == u32::from(network) & mask
        }
        (IpAddr::V6(addr), IpAddr::V6(network)) if prefix <= 128 => {
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            u128::from(addr) & mask == u128::from(network) & mask
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::ip_in_cidr;

    #[test]
    fn cidr_matches_v4_and_v6() {
        assert!(ip_in_cidr("10.1.2.3", "10.0.0.0/8"));
        assert!(!ip_in_cidr("11.1.2.3", "10.0.0.0/8"));
        assert!(ip_in_cidr("192.168.1.7", "0.0.0.0/0"));
        assert!(ip_in_cidr("fd00::1", "fd00::/8"));
        assert!(!ip_in_cidr("10.1.2.3", "fd00::/8"));
    }

    #[test]
    fn malformed_cidr_never_matches() {
        assert!(!ip_in_cidr("10.1.2.3", "10.0.0.0"));
        assert!(!ip_in_cidr("10.1.2.3", "10.0.0.0/40"));
        assert!(!ip_in_cidr("not-an-ip", "10.0.0.0/8"));
    }
}
