use crate::error::AuthError;

/// Merges the owner named in the path with the one in the query string.
///
/// Conflicting values are rejected outright; empty values count as absent.
pub fn resolve_owner(
    path_owner: Option<&str>,
    query_owner: Option<&str>,
) -> Result<Option<String>, AuthError> {
    let path_owner = path_owner.filter(|value| !value.is_empty());
    let query_owner = query_owner.filter(|value| !value.is_empty());
    match (path_owner, query_owner) {
        (Some(path), Some(query)) if path != query => Err(AuthError::Ambiguous {
            path: path.to_string(),
            query: query.to_string(),
        }),
        (Some(owner), _) | (None, Some(owner)) => Ok(Some(owner.to_string())),
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_and_query_are_interchangeable() {
        let from_path = resolve_owner(Some("alice"), None).expect("path");
        let from_query = resolve_owner(None, Some("alice")).expect("query");
        let from_both = resolve_owner(Some("alice"), Some("alice")).expect("both");
        assert_eq!(from_path, Some("alice".to_string()));
        assert_eq!(from_path, from_query);
        assert_eq!(from_path, from_both);
    }

    #[test]
    fn conflicting_owners_are_ambiguous() {
        for (path, query) in [("alice", "bob"), ("bob", "alice")] {
            assert_eq!(
                resolve_owner(Some(path), Some(query)),
                Err(AuthError::Ambiguous {
                    path: path.to_string(),
                    query: query.to_string(),
                })
            );
        }
    }

    #[test]
    fn empty_values_are_ignored() {
        assert_eq!(resolve_owner(Some(""), Some("bob")), Ok(Some("bob".to_string())));
        assert_eq!(resolve_owner(None, Some("")), Ok(None));
    }
}
