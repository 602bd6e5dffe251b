use uuid::Uuid;

pub fn uuid_v5(ns: Uuid, name: &str) -> Uuid {
    Uuid::new_v5(&ns, name.as_bytes())
}

/// Eight hex characters derived from `name`; stable across processes.
pub fn stable_digest(name: &str) -> String {
    let simple = uuid_v5(Uuid::NAMESPACE_OID, name).simple().to_string();
    simple[..8].to_string()
}

pub fn stable_edge_id(edge_label: &str, from: &str, to: &str, discriminator: &str) -> Uuid {
    // name 形如 "has_genre|Movie/the_matrix_603|Genre/action"
    let mut name = format!("{}|{}|{}", edge_label, from, to);
    if !discriminator.is_empty() {
        name.push('|');
        name.push_str(discriminator);
    }
    uuid_v5(Uuid::NAMESPACE_OID, &name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_ids_depend_on_every_component() {
        let a = stable_edge_id("has_genre", "Movie/a", "Genre/b", "");
        assert_eq!(a, stable_edge_id("has_genre", "Movie/a", "Genre/b", ""));
        assert_ne!(a, stable_edge_id("has_genre", "Movie/a", "Genre/c", ""));
        assert_ne!(a, stable_edge_id("has_keyword", "Movie/a", "Genre/b", ""));
        assert_ne!(a, stable_edge_id("has_genre", "Movie/a", "Genre/b", "x"));
    }

    #[test]
    fn digest_is_short_hex() {
        let d = stable_digest("anything");
        assert_eq!(d.len(), 8);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d, stable_digest("anything"));
    }
}
