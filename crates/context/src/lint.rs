use super::{Project, SourceKind};

/// Scan function parameters for quoted names of other sources or
/// connections which the function doesn't declare as dependencies.
/// Each finding is logged as a warning, and the number of findings returned.
/// The scan is advisory: declared dependencies remain authoritative.
pub fn lint_dependencies(project: &Project) -> usize {
    let config = project.config();
    let components: Vec<&str> = config
        .sources
        .keys()
        .chain(config.connections.keys())
        .map(String::as_str)
        .collect();

    let mut warnings = 0;
    for (source, source_config) in &config.sources {
        let SourceKind::Transform(transform) = &source_config.kind else {
            continue;
        };
        for function in &transform.functions {
            let mut texts = Vec::new();
            collect_strings(&function.params, &mut texts);

            for component in &components {
                if *component == source.as_str()
                    || function.dependencies.iter().any(|d| d == component)
                {
                    continue;
                }
                if texts.iter().any(|text| is_quoted_in(text, component)) {
                    tracing::warn!(
                        source = %source,
                        function = %function.name,
                        component,
                        "function appears to reference a component it doesn't declare as a dependency"
                    );
                    warnings += 1;
                }
            }
        }
    }
    warnings
}

fn collect_strings<'v>(value: &'v serde_json::Value, out: &mut Vec<&'v str>) {
    match value {
        serde_json::Value::String(s) => out.push(s),
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn is_quoted_in(text: &str, name: &str) -> bool {
    ['"', '\''].iter().any(|q| text.contains(&format!("{q}{name}{q}")))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    #[tracing_test::traced_test]
    fn test_undeclared_references_warn() {
        let project = Project::from_yaml(
            r#"
name: demo
connections:
  db: {type: sqlite}
sources:
  rates:
    type: rows
    columns: [{name: rate}]
  orders:
    type: rows
    columns: [{name: amount}]
  priced:
    type: transform
    input: orders
    functions:
      - name: lookup
        type: constant
        params: {script: "read('rates') from 'db'", value: 1}
        dependencies: [db]
"#,
        )
        .unwrap();

        assert_eq!(lint_dependencies(&project), 1);
        assert!(logs_contain("component=\"rates\""));
        assert!(!logs_contain("component=\"db\""));
    }

    #[test]
    fn test_quoting() {
        assert!(is_quoted_in("load(\"orders\")", "orders"));
        assert!(is_quoted_in("'orders'", "orders"));
        assert!(!is_quoted_in("orders_archive", "orders"));
    }
}
