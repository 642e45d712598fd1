//! Role and scope checks
//!
//! Every check takes either a single name or a list. A list matches when the
//! session holds at least one of its entries.

use std::collections::BTreeSet;

/// One or more role/scope names, matched with ANY-of semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnyOf<'a>(Vec<&'a str>);

impl<'a> AnyOf<'a> {
    pub fn matches(&self, held: &BTreeSet<String>) -> bool {
        self.0.iter().any(|name| held.contains(*name))
    }

    pub fn names(&self) -> &[&'a str] {
        &self.0
    }
}

impl<'a> From<&'a str> for AnyOf<'a> {
    fn from(name: &'a str) -> Self {
        AnyOf(vec![name])
    }
}

impl<'a> From<&'a String> for AnyOf<'a> {
    fn from(name: &'a String) -> Self {
        AnyOf(vec![name.as_str()])
    }
}

impl<'a> From<&'a [&'a str]> for AnyOf<'a> {
    fn from(names: &'a [&'a str]) -> Self {
        AnyOf(names.to_vec())
    }
}

impl<'a, const N: usize> From<[&'a str; N]> for AnyOf<'a> {
    fn from(names: [&'a str; N]) -> Self {
        AnyOf(names.to_vec())
    }
}

impl<'a> From<Vec<&'a str>> for AnyOf<'a> {
    fn from(names: Vec<&'a str>) -> Self {
        AnyOf(names)
    }
}

impl<'a> From<&'a [String]> for AnyOf<'a> {
    fn from(names: &'a [String]) -> Self {
        AnyOf(names.iter().map(String::as_str).collect())
    }
}

impl<'a> From<&'a Vec<String>> for AnyOf<'a> {
    fn from(names: &'a Vec<String>) -> Self {
        AnyOf(names.iter().map(String::as_str).collect())
    }
}

/// What a guarded view needs from the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Authenticated,
    AnyRole(Vec<String>),
    AnyScope(Vec<String>),
}

impl Requirement {
    pub fn role(name: impl Into<String>) -> Self {
        Requirement::AnyRole(vec![name.into()])
    }

    pub fn scope(name: impl Into<String>) -> Self {
        Requirement::AnyScope(vec![name.into()])
    }
}

/// Outcome of a guard check; where to send the user is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    /// Not logged in
    LoginRequired,
    /// Logged in, but missing the role or scope
    Forbidden,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_name() {
        let roles = held(&["admin"]);
        assert!(AnyOf::from("admin").matches(&roles));
        assert!(!AnyOf::from("manager").matches(&roles));
    }

    #[test]
    fn test_list_is_any_of() {
        assert!(AnyOf::from(["admin", "manager"]).matches(&held(&["manager"])));
        assert!(!AnyOf::from(["admin", "manager"]).matches(&held(&["viewer"])));
    }

    #[test]
    fn test_empty_list_never_matches() {
        let empty: &[&str] = &[];
        assert!(!AnyOf::from(empty).matches(&held(&["admin"])));
    }

    #[test]
    fn test_owned_names() {
        let wanted = vec!["viewer".to_string(), "admin".to_string()];
        assert!(AnyOf::from(&wanted).matches(&held(&["admin"])));
    }
}
