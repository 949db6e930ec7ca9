//! Environment lookup and `${VAR}` placeholder expansion.

use std::collections::HashMap;

/// Source of environment-supplied credentials. Blank values count as unset.
pub trait EnvLookup: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name)
            .filter(|value| !value.trim().is_empty())
            .cloned()
    }
}

/// Replaces each `${NAME}` in `value` with its environment value. Names that
/// do not resolve expand to nothing and are appended to `unresolved`.
pub fn expand_placeholders(
    value: &str,
    env: &dyn EnvLookup,
    unresolved: &mut Vec<String>,
) -> String {
    let mut output = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };
        let name = &after[..end];
        match env.var(name) {
            Some(resolved) => output.push_str(&resolved),
            None => {
                if !unresolved.iter().any(|existing| existing == name) {
                    unresolved.push(name.to_string());
                }
            }
        }
        rest = &after[end + 1..];
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn expands_known_placeholders() {
        let env = env(&[("TOKEN", "abc"), ("HOST", "db.local")]);
        let mut unresolved = Vec::new();
        let value = expand_placeholders("Bearer ${TOKEN}@${HOST}", &env, &mut unresolved);
        assert_eq!(value, "Bearer abc@db.local");
        assert!(unresolved.is_empty());
    }

    #[test]
    fn records_unresolved_and_blank_names_once() {
        let env = env(&[("BLANK", "  ")]);
        let mut unresolved = Vec::new();
        let value = expand_placeholders("${MISSING}-${BLANK}-${MISSING}", &env, &mut unresolved);
        assert_eq!(value, "--");
        assert_eq!(unresolved, vec!["MISSING".to_string(), "BLANK".to_string()]);
    }

    #[test]
    fn leaves_unterminated_placeholders_alone() {
        let env = env(&[]);
        let mut unresolved = Vec::new();
        assert_eq!(
            expand_placeholders("literal ${OPEN", &env, &mut unresolved),
            "literal ${OPEN"
        );
        assert!(unresolved.is_empty());
    }
}
