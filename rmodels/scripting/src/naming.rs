use uuid::Uuid;

/// Letter every namespace name starts with.
pub const NAMESPACE_PREFIX: &str = "m";

const STAGED_SUFFIX: &str = "_staged";

/// Engine binding for a model: the prefix followed by the identifier with its
/// hyphens removed. Distinct identifiers always give distinct names.
#[must_use]
pub fn namespace_name(id: Uuid) -> String {
    format!("{NAMESPACE_PREFIX}{}", id.simple())
}

/// Binding a namespace is built under before it is committed.
#[must_use]
pub fn staged_name(namespace: &str) -> String {
    format!("{namespace}{STAGED_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_separators_and_prefixes() {
        let id = Uuid::parse_str("0b3c7e52-4a5f-4d1e-9c3a-6f2b8d9e0a11").unwrap();
        assert_eq!(namespace_name(id), "m0b3c7e524a5f4d1e9c3a6f2b8d9e0a11");
        assert_eq!(
            staged_name(&namespace_name(id)),
            "m0b3c7e524a5f4d1e9c3a6f2b8d9e0a11_staged"
        );
    }

    #[test]
    fn distinct_ids_give_distinct_names() {
        assert_ne!(namespace_name(Uuid::new_v4()), namespace_name(Uuid::new_v4()));
    }
}
