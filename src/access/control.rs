use super::properties::PropertySpec;
use crate::core::{Action, DbError, Record, Result};
use crate::rules::{Condition, RuleEvaluator};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Permission for one `(resource, action)` pair. `resource` `*` matches any table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub resource: String,
    pub action: Action,
    /// Row condition; a grant carrying one is only preliminary until the
    /// condition is evaluated against concrete data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertySpec>,
}

impl Grant {
    pub fn new(resource: impl Into<String>, action: Action) -> Self {
        Self {
            resource: resource.into(),
            action,
            condition: None,
            properties: None,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_properties(mut self, properties: PropertySpec) -> Self {
        self.properties = Some(properties);
        self
    }

    fn covers(&self, resource: &str, action: Action) -> bool {
        self.action == action && (self.resource == resource || self.resource == "*")
    }

    /// `resource:action` key used by access lists.
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            grants: Vec::new(),
        }
    }

    pub fn grant(mut self, grant: Grant) -> Self {
        self.grants.push(grant);
        self
    }

    /// Exact resource match wins over the `*` wildcard.
    fn find(&self, resource: &str, action: Action) -> Option<&Grant> {
        self.grants
            .iter()
            .find(|g| g.action == action && g.resource == resource)
            .or_else(|| self.grants.iter().find(|g| g.covers(resource, action)))
    }
}

/// Preliminary: a grant exists for every role. Full: every role's condition
/// (if any) was evaluated against a context and passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantLevel {
    pub preliminary: bool,
    pub full: bool,
}

/// Verdict for a single role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role: String,
    pub granted: bool,
    pub grant: GrantLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertySpec>,
}

/// Result of [`AccessControl::can`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub action: Action,
    pub granted: bool,
    pub grant: GrantLevel,
    pub per_role: Vec<RoleGrant>,
}

impl Permission {
    /// Unconditional permission with no property restrictions.
    pub fn unrestricted(resource: impl Into<String>, action: Action) -> Self {
        Self {
            resource: resource.into(),
            action,
            granted: true,
            grant: GrantLevel {
                preliminary: true,
                full: true,
            },
            per_role: Vec::new(),
        }
    }
}

/// Role-based grants. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct AccessControl {
    roles: HashMap<String, Role>,
    rules: Arc<RuleEvaluator>,
}

impl AccessControl {
    pub fn new(rules: Arc<RuleEvaluator>) -> Self {
        Self {
            roles: HashMap::new(),
            rules,
        }
    }

    /// Registers a role; every grant condition must use known operators.
    pub fn with_role(mut self, role: Role) -> Result<Self> {
        self.add_role(role)?;
        Ok(self)
    }

    pub fn add_role(&mut self, role: Role) -> Result<()> {
        for grant in &role.grants {
            if let Some(condition) = &grant.condition {
                self.rules.validate(condition)?;
            }
        }
        tracing::debug!(role = %role.name, grants = role.grants.len(), "registered role");
        self.roles.insert(role.name.clone(), role);
        Ok(())
    }

    /// Parses a JSON array of roles.
    pub fn from_json(rules: Arc<RuleEvaluator>, value: serde_json::Value) -> Result<Self> {
        let roles: Vec<Role> = serde_json::from_value(value)
            .map_err(|e| DbError::Configuration(format!("invalid role definition: {}", e)))?;
        let mut control = Self::new(rules);
        for role in roles {
            control.add_role(role)?;
        }
        Ok(control)
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    pub fn rules(&self) -> &Arc<RuleEvaluator> {
        &self.rules
    }

    fn can_role(
        &self,
        role: &str,
        action: Action,
        resource: &str,
        context: Option<&Record>,
    ) -> Result<RoleGrant> {
        let denied = || RoleGrant {
            role: role.to_string(),
            granted: false,
            grant: GrantLevel::default(),
            condition: None,
            properties: None,
        };

        let Some(grant) = self.roles.get(role).and_then(|r| r.find(resource, action)) else {
            return Ok(denied());
        };

        let level = match (&grant.condition, context) {
            (None, _) => GrantLevel {
                preliminary: true,
                full: true,
            },
            (Some(_), None) => GrantLevel {
                preliminary: true,
                full: false,
            },
            (Some(condition), Some(context)) => {
                if !self.rules.evaluate(condition, context)? {
                    return Ok(denied());
                }
                GrantLevel {
                    preliminary: true,
                    full: true,
                }
            }
        };

        Ok(RoleGrant {
            role: role.to_string(),
            granted: true,
            grant: level,
            condition: grant.condition.clone(),
            properties: grant.properties.clone(),
        })
    }

    /// Conjunction over `roles`: denied when any role denies (or when no role
    /// is given), full only when every role is full.
    pub fn can(
        &self,
        roles: &[&str],
        action: Action,
        resource: &str,
        context: Option<&Record>,
    ) -> Result<Permission> {
        let per_role = roles
            .iter()
            .map(|role| self.can_role(role, action, resource, context))
            .collect::<Result<Vec<_>>>()?;

        let granted = !per_role.is_empty() && per_role.iter().all(|r| r.granted);
        let grant = GrantLevel {
            preliminary: granted && per_role.iter().all(|r| r.grant.preliminary),
            full: granted && per_role.iter().all(|r| r.grant.full),
        };

        tracing::debug!(
            resource,
            action = %action,
            roles = ?roles,
            granted,
            full = grant.full,
            "access check"
        );

        Ok(Permission {
            resource: resource.to_string(),
            action,
            granted,
            grant,
            per_role,
        })
    }

    /// `resource:action` keys granted by every one of `roles`.
    pub fn access_list(&self, roles: &[&str]) -> BTreeSet<String> {
        let mut sets = roles.iter().map(|name| {
            self.roles
                .get(*name)
                .map(|role| role.grants.iter().map(Grant::key).collect::<BTreeSet<_>>())
                .unwrap_or_default()
        });
        let Some(first) = sets.next() else {
            return BTreeSet::new();
        };
        sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect())
    }
}
