use super::control::{AccessControl, Permission};
use super::properties::{self, PropertySpec};
use crate::core::{Action, Backend, DbError, Record, Result};
use crate::rules::{Condition, Predicate, RuleEvaluator};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Outcome of a permission check, threaded through one logical operation.
///
/// `conditions` are AND-combined row predicates; `properties` are stacked
/// masks, one per consulted role, OR-combined. An empty `properties` list
/// means no property is restricted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub resource: String,
    pub action: Action,
    pub granted: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
}

impl Authorization {
    pub fn unrestricted(resource: impl Into<String>, action: Action) -> Self {
        Self {
            resource: resource.into(),
            action,
            granted: true,
            conditions: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn has_property_masks(&self) -> bool {
        !self.properties.is_empty()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.granted && self.conditions.is_empty() && self.properties.is_empty()
    }
}

/// How the caller of a facade operation is authorized.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Access {
    /// Trusted internal caller.
    #[default]
    Unrestricted,
    /// Role names, resolved through the store's [`AccessControl`].
    Roles(Vec<String>),
    /// A permission already obtained from [`AccessControl::can`].
    Permission(Permission),
    /// A descriptor computed earlier in the same logical operation.
    Authorization(Authorization),
}

impl Access {
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Access::Roles(roles.into_iter().map(Into::into).collect())
    }
}

/// Turns permissions into [`Authorization`] descriptors and applies them to
/// records, property sets and backend predicates.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationEngine {
    rules: Arc<RuleEvaluator>,
}

impl AuthorizationEngine {
    pub fn new(rules: Arc<RuleEvaluator>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &Arc<RuleEvaluator> {
        &self.rules
    }

    /// Fails with `Forbidden` when the permission was not granted.
    pub fn authorized(&self, permission: &Permission) -> Result<Authorization> {
        if !permission.granted {
            return Err(DbError::forbidden(
                &permission.resource,
                permission.action.as_str(),
                "no role grants this action",
            ));
        }

        let conditions = permission
            .per_role
            .iter()
            .filter_map(|role| role.condition.clone())
            .collect();

        // A role without a property spec sees everything, and stacked specs
        // are OR-combined, so one unrestricted role lifts every mask.
        let properties = if permission.per_role.iter().all(|r| r.properties.is_some()) {
            permission
                .per_role
                .iter()
                .filter_map(|r| r.properties.clone())
                .collect()
        } else {
            Vec::new()
        };

        Ok(Authorization {
            resource: permission.resource.clone(),
            action: permission.action,
            granted: true,
            conditions,
            properties,
        })
    }

    /// Resolves `access` for `(resource, action)`.
    pub fn resolve(
        &self,
        control: Option<&AccessControl>,
        access: &Access,
        resource: &str,
        action: Action,
    ) -> Result<Authorization> {
        match access {
            Access::Unrestricted => Ok(Authorization::unrestricted(resource, action)),
            Access::Roles(roles) => {
                let control = control.ok_or_else(|| {
                    DbError::Configuration("role-based access requires access control".to_string())
                })?;
                let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
                self.authorized(&control.can(&roles, action, resource, None)?)
            }
            Access::Permission(permission) => {
                self.check_target(&permission.resource, permission.action, resource, action)?;
                self.authorized(permission)
            }
            Access::Authorization(auth) => {
                self.check_target(&auth.resource, auth.action, resource, action)?;
                if !auth.granted {
                    return Err(DbError::forbidden(resource, action.as_str(), "not granted"));
                }
                Ok(auth.clone())
            }
        }
    }

    fn check_target(
        &self,
        given_resource: &str,
        given_action: Action,
        resource: &str,
        action: Action,
    ) -> Result<()> {
        if given_action != action || (given_resource != resource && given_resource != "*") {
            return Err(DbError::forbidden(
                resource,
                action.as_str(),
                format!("authorization was issued for {}:{}", given_resource, given_action),
            ));
        }
        Ok(())
    }

    /// `true` when `record` satisfies every row condition.
    pub fn permits(&self, auth: &Authorization, record: &Record) -> Result<bool> {
        for condition in &auth.conditions {
            if !self.rules.evaluate(condition, record)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `None` when the record is denied.
    pub fn authorized_record(&self, auth: &Authorization, record: Record) -> Result<Option<Record>> {
        Ok(if self.permits(auth, &record)? {
            Some(record)
        } else {
            None
        })
    }

    /// Keeps the records every row condition accepts.
    pub fn authorized_data(&self, auth: &Authorization, records: Vec<Record>) -> Result<Vec<Record>> {
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if self.permits(auth, &record)? {
                kept.push(record);
            }
        }
        Ok(kept)
    }

    /// Masks `data` with the stacked property specs. Conditions are evaluated
    /// against `current` when given, otherwise against `data` itself.
    pub fn authorized_properties(
        &self,
        auth: &Authorization,
        data: &Record,
        current: Option<&Record>,
    ) -> Result<Record> {
        let specs: Vec<&PropertySpec> = auth.properties.iter().collect();
        let context = current.unwrap_or(data);
        properties::mask(&self.rules, &specs, data, current, context, true)
    }

    /// Row conditions rendered for `backend`, AND-combined. `None` when there
    /// are no conditions.
    pub fn authorized_filter(&self, auth: &Authorization, backend: Backend) -> Result<Option<Predicate>> {
        if auth.conditions.is_empty() {
            return Ok(None);
        }
        match backend {
            Backend::Db => {
                let parts = auth
                    .conditions
                    .iter()
                    .map(|c| self.rules.compile_sql(c))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(Predicate::Sql(parts.join(" AND "))))
            }
            Backend::Es => {
                let mut clauses = Vec::with_capacity(auth.conditions.len());
                for condition in &auth.conditions {
                    let clause = self.rules.compile_search(condition)?.ok_or_else(|| {
                        DbError::Filter(format!(
                            "row condition on '{}' cannot be expressed as a search query",
                            auth.resource
                        ))
                    })?;
                    clauses.push(clause);
                }
                Ok(Some(Predicate::Search(if clauses.len() == 1 {
                    clauses.remove(0)
                } else {
                    json!({"bool": {"must": clauses}})
                })))
            }
        }
    }
}
