//! Domain grouping for multi-SAN certificates
//!
//! Related hostnames ride on a single certificate: all domains sharing a
//! second level (the last two dot-separated labels) form one group. This is
//! a best-effort heuristic, not a formal zone grouping.

/// Group domains by second level.
///
/// The first entry of each group anchors it (and becomes the CSR common
/// name): the bare second level itself when present in the input, otherwise
/// the first domain encountered. Domains with fewer than two labels are
/// dropped. Group order follows first encounter, so the result is
/// deterministic for a given input order.
pub fn group_by_second_level(domains: &[String]) -> Vec<Vec<String>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, Vec<String>> =
        std::collections::HashMap::new();

    for domain in domains {
        let Some(second) = second_level(domain) else {
            tracing::warn!("dropping domain {} from certificate grouping", domain);
            continue;
        };

        let group = groups.entry(second.clone()).or_insert_with(|| {
            order.push(second.clone());
            Vec::new()
        });

        if *domain == second {
            group.insert(0, domain.clone());
        } else {
            group.push(domain.clone());
        }
    }

    order
        .into_iter()
        .map(|second| groups.remove(&second).unwrap_or_default())
        .collect()
}

/// Last two labels of a domain, or `None` for names with fewer than two.
fn second_level(domain: &str) -> Option<String> {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return None;
    }
    Some(labels[labels.len() - 2..].join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_groups_by_second_level() {
        let groups = group_by_second_level(&domains(&[
            "a.example.com",
            "b.example.com",
            "x.other.com",
        ]));

        assert_eq!(
            groups,
            vec![
                domains(&["a.example.com", "b.example.com"]),
                domains(&["x.other.com"]),
            ]
        );
    }

    #[test]
    fn test_bare_second_level_anchors_group() {
        let groups = group_by_second_level(&domains(&[
            "a.example.com",
            "example.com",
            "b.example.com",
        ]));

        assert_eq!(
            groups,
            vec![domains(&["example.com", "a.example.com", "b.example.com"])]
        );
    }

    #[test]
    fn test_first_domain_anchors_without_bare_second_level() {
        let groups = group_by_second_level(&domains(&["deep.a.example.com", "b.example.com"]));
        assert_eq!(groups[0][0], "deep.a.example.com");
    }

    #[test]
    fn test_short_names_dropped() {
        let groups = group_by_second_level(&domains(&["localhost", "a.example.com"]));
        assert_eq!(groups, vec![domains(&["a.example.com"])]);
    }

    #[test]
    fn test_empty_input() {
        assert!(group_by_second_level(&[]).is_empty());
    }
}
