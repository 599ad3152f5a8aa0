/// Turn a project name into a branch-safe slug.
///
/// Lowercases, maps spaces to `-` and drops anything outside `[a-z0-9-_]`.
/// Falls back to `project` when nothing survives.
pub fn sanitize_branch(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .collect();
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug
    }
}

/// Branch the autonomous flow works on.
pub fn work_branch(project_name: &str) -> String {
    format!("ai/{}", sanitize_branch(project_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_project_names() {
        assert_eq!(sanitize_branch("My Cool App!"), "my-cool-app");
        assert_eq!(sanitize_branch("snake_case v2.0"), "snake_case-v20");
        assert_eq!(work_branch("Todo API"), "ai/todo-api");
    }

    #[test]
    fn empty_slug_falls_back() {
        assert_eq!(sanitize_branch("!!!"), "project");
    }
}
