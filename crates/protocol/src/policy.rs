//! Container access-policy expressions.
//!
//! A policy value is either one of the special values (`inherit`, `default`,
//! `none`, `all`) or an expression over roles, where `&` joins roles that must
//! all hold and `,` separates alternatives. `&` binds tighter than `,`, so
//! `owner&manager,user` reads as "(owner and manager) or user".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors produced while building or parsing policy values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("empty policy expression")]
    Empty,

    #[error("unknown policy atom: {0}")]
    UnknownAtom(String),

    #[error("`{0}` cannot be combined with other values")]
    NotCombinable(String),
}

/// A role that can appear inside a policy expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyRole {
    User,
    Owner,
    Manager,
    ItemOwner,
}

impl PolicyRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Owner => "owner",
            Self::Manager => "manager",
            Self::ItemOwner => "itemOwner",
        }
    }
}

impl FromStr for PolicyRole {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "owner" => Ok(Self::Owner),
            "manager" => Ok(Self::Manager),
            "itemOwner" => Ok(Self::ItemOwner),
            "" => Err(PolicyError::Empty),
            other => Err(PolicyError::UnknownAtom(other.to_string())),
        }
    }
}

/// A policy expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PolicyValue {
    Inherit,
    Default,
    None,
    All,
    /// Alternatives (`,`), each a conjunction (`&`) of roles.
    Expr(Vec<Vec<PolicyRole>>),
}

impl From<PolicyRole> for PolicyValue {
    fn from(role: PolicyRole) -> Self {
        Self::Expr(vec![vec![role]])
    }
}

impl PolicyValue {
    pub fn user() -> Self {
        PolicyRole::User.into()
    }

    pub fn owner() -> Self {
        PolicyRole::Owner.into()
    }

    pub fn manager() -> Self {
        PolicyRole::Manager.into()
    }

    pub fn item_owner() -> Self {
        PolicyRole::ItemOwner.into()
    }

    /// Requires both `self` and `other` to hold.
    ///
    /// Conjunction distributes over alternatives, so the result stays in the
    /// flat `a&b,c&d` form the Endpoint library accepts.
    pub fn and(self, other: impl Into<PolicyValue>) -> Result<Self, PolicyError> {
        let (lhs, rhs) = (self.into_groups()?, other.into().into_groups()?);
        let mut groups = Vec::with_capacity(lhs.len() * rhs.len());
        for l in &lhs {
            for r in &rhs {
                let mut group = l.clone();
                for role in r {
                    if !group.contains(role) {
                        group.push(*role);
                    }
                }
                groups.push(group);
            }
        }
        Ok(Self::Expr(groups))
    }

    /// Accepts either `self` or `other`.
    pub fn or(self, other: impl Into<PolicyValue>) -> Result<Self, PolicyError> {
        let mut groups = self.into_groups()?;
        groups.extend(other.into().into_groups()?);
        Ok(Self::Expr(groups))
    }

    fn into_groups(self) -> Result<Vec<Vec<PolicyRole>>, PolicyError> {
        match self {
            Self::Expr(groups) => Ok(groups),
            special => Err(PolicyError::NotCombinable(special.to_string())),
        }
    }
}

impl fmt::Display for PolicyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherit => f.write_str("inherit"),
            Self::Default => f.write_str("default"),
            Self::None => f.write_str("none"),
            Self::All => f.write_str("all"),
            Self::Expr(groups) => {
                let rendered: Vec<String> = groups
                    .iter()
                    .map(|group| {
                        group
                            .iter()
                            .map(|role| role.as_str())
                            .collect::<Vec<_>>()
                            .join("&")
                    })
                    .collect();
                f.write_str(&rendered.join(","))
            }
        }
    }
}

impl FromStr for PolicyValue {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "" => return Err(PolicyError::Empty),
            "inherit" => return Ok(Self::Inherit),
            "default" => return Ok(Self::Default),
            "none" => return Ok(Self::None),
            "all" => return Ok(Self::All),
            _ => {}
        }

        let mut groups = Vec::new();
        for alternative in s.split(',') {
            let mut group = Vec::new();
            for atom in alternative.split('&') {
                let atom = atom.trim();
                if matches!(atom, "inherit" | "default" | "none" | "all") {
                    return Err(PolicyError::NotCombinable(atom.to_string()));
                }
                group.push(atom.parse::<PolicyRole>()?);
            }
            groups.push(group);
        }
        Ok(Self::Expr(groups))
    }
}

impl TryFrom<String> for PolicyValue {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PolicyValue> for String {
    fn from(value: PolicyValue) -> Self {
        value.to_string()
    }
}

/// Tri-state flag used by the boolean container-policy switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyBool {
    Yes,
    No,
    Inherit,
    Default,
}

/// Policy applied to items (files, entries) inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<PolicyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_my: Option<PolicyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_all: Option<PolicyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<PolicyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<PolicyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<PolicyValue>,
}

impl ItemPolicy {
    pub fn with_get(mut self, value: PolicyValue) -> Self {
        self.get = Some(value);
        self
    }

    pub fn with_list_my(mut self, value: PolicyValue) -> Self {
        self.list_my = Some(value);
        self
    }

    pub fn with_list_all(mut self, value: PolicyValue) -> Self {
        self.list_all = Some(value);
        self
    }

    pub fn with_create(mut self, value: PolicyValue) -> Self {
        self.create = Some(value);
        self
    }

    pub fn with_update(mut self, value: PolicyValue) -> Self {
        self.update = Some(value);
        self
    }

    pub fn with_delete(mut self, value: PolicyValue) -> Self {
        self.delete = Some(value);
        self
    }
}

/// Policy applied to a container (store, inbox) itself.
///
/// Unset fields are omitted on the wire and fall back to the context policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<PolicyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<PolicyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<PolicyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<PolicyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updater_can_be_removed_from_managers: Option<PolicyBool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_can_be_removed_from_managers: Option<PolicyBool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_overwrite_context_policy: Option<PolicyBool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemPolicy>,
}

impl ContainerPolicy {
    pub fn with_get(mut self, value: PolicyValue) -> Self {
        self.get = Some(value);
        self
    }

    pub fn with_update(mut self, value: PolicyValue) -> Self {
        self.update = Some(value);
        self
    }

    pub fn with_delete(mut self, value: PolicyValue) -> Self {
        self.delete = Some(value);
        self
    }

    pub fn with_update_policy(mut self, value: PolicyValue) -> Self {
        self.update_policy = Some(value);
        self
    }

    pub fn with_updater_can_be_removed_from_managers(mut self, value: PolicyBool) -> Self {
        self.updater_can_be_removed_from_managers = Some(value);
        self
    }

    pub fn with_owner_can_be_removed_from_managers(mut self, value: PolicyBool) -> Self {
        self.owner_can_be_removed_from_managers = Some(value);
        self
    }

    pub fn with_can_overwrite_context_policy(mut self, value: PolicyBool) -> Self {
        self.can_overwrite_context_policy = Some(value);
        self
    }

    pub fn with_item(mut self, item: ItemPolicy) -> Self {
        self.item = Some(item);
        self
    }
}
