// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Hierarchical capability scopes with a `*` suffix wildcard.
//!
//! A granted scope matches a required scope when:
//! - it is exactly equal (`a.b.c` grants `a.b.c`),
//! - it is the global wildcard `*`,
//! - it ends in `.*` and the required scope lives strictly below the
//!   prefix (`a.*` grants `a.x` and `a.x.y`, but not `a` itself and not
//!   `ab.c`).

/// Whether `granted` satisfies `required`.
#[must_use]
pub fn scope_matches(granted: &str, required: &str) -> bool {
    if granted == "*" {
        return true;
    }
    if let Some(prefix) = granted.strip_suffix(".*") {
        return required.len() > prefix.len() + 1
            && required.starts_with(prefix)
            && required.as_bytes()[prefix.len()] == b'.';
    }
    granted == required
}

/// Whether any scope in `granted` satisfies `required`.
#[must_use]
pub fn any_scope_matches<'a, I>(granted: I, required: &str) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    granted.into_iter().any(|g| scope_matches(g, required))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_grid() {
        let cases = [
            ("a.b.c", "a.b.c", true),
            ("a.b.c", "a.b", false),
            ("a.b.c", "a.b.c.d", false),
            ("a.*", "a.x", true),
            ("a.*", "a.x.y", true),
            ("a.*", "a", false),
            ("a.*", "ab.c", false),
            ("a.*", "b.x", false),
            ("*", "anything.at.all", true),
            ("*", "a", true),
            ("arena.*", "arena.containers", true),
            ("arena.containers", "arena.containers", true),
            ("arena.containers", "arena.matches", false),
        ];
        for (granted, required, want) in cases {
            assert_eq!(
                scope_matches(granted, required),
                want,
                "granted `{granted}` vs required `{required}`"
            );
        }
    }

    #[test]
    fn any_scope_short_circuits_across_the_set() {
        let granted = ["arena.matches", "arena.streams"];
        assert!(any_scope_matches(granted, "arena.streams"));
        assert!(!any_scope_matches(granted, "arena.nodes"));
        assert!(any_scope_matches(["*"], "arena.nodes"));
    }
}
