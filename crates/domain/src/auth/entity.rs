use super::rbac::Role;

/// Authenticated caller, attached to the request by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Key name, used as the actor in change records.
    pub name: String,
    pub role: Role,
}

impl Principal {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn can(&self, required: Role) -> bool {
        self.role.grants(required)
    }
}
