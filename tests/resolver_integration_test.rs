// Integration tests for dependency resolution and conflict surfacing

#[cfg(test)]
mod resolver_integration_tests {
    use paker::conflict::{ConflictDetector, ConflictKind};
    use paker::dependency::resolver::ResolverConfig;
    use paker::dependency::version::parse_version;
    use paker::dependency::{DependencyResolver, ParseStrategy, ResolveError};
    use std::path::Path;

    fn project() -> (tempfile::TempDir, DependencyResolver) {
        let dir = tempfile::tempdir().unwrap();
        let resolver = DependencyResolver::new(dir.path(), ResolverConfig::default());
        (dir, resolver)
    }

    fn write_package(root: &Path, name: &str, manifest: &str) {
        let dir = root.join("packages").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("paker.json"), manifest).unwrap();
    }

    #[tokio::test]
    async fn test_version_conflict_surfaced_with_paths() {
        // Two seeds pulling fmt with =8.1.1 and >=9.0.0 respectively.
        let (dir, mut resolver) = project();
        write_package(
            dir.path(),
            "seed-a",
            r#"{"dependencies": {"fmt": "=8.1.1"}}"#,
        );
        write_package(
            dir.path(),
            "seed-b",
            r#"{"dependencies": {"fmt": ">=9.0.0"}}"#,
        );
        resolver.add_known_versions(
            "fmt",
            vec![
                parse_version("8.1.1").unwrap(),
                parse_version("9.0.0").unwrap(),
                parse_version("9.1.0").unwrap(),
            ],
        );

        resolver.resolve_package("seed-a", None).await.unwrap();
        let err = resolver.resolve_package("seed-b", None).await.unwrap_err();

        let ResolveError::Conflict(conflicts) = err else {
            panic!("expected a conflict, got: {:?}", err);
        };
        assert_eq!(conflicts.len(), 1);

        let conflict = &conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::Version);
        assert_eq!(conflict.package, "fmt");
        assert!(conflict
            .conflicting_versions
            .contains(&"8.1.1".to_string()));
        assert!(
            conflict.conflicting_versions.contains(&"9.0.0".to_string())
                || conflict.conflicting_versions.contains(&"9.1.0".to_string())
        );

        // Both dependency paths to fmt are reported.
        assert_eq!(conflict.paths.len(), 2);
        let flattened: Vec<String> = conflict.paths.iter().flatten().cloned().collect();
        assert!(flattened.contains(&"seed-a".to_string()));
        assert!(flattened.contains(&"seed-b".to_string()));
    }

    #[tokio::test]
    async fn test_cycle_detected_and_topological_sort_refused() {
        let (dir, mut resolver) = project();
        write_package(dir.path(), "a", r#"{"dependencies": {"b": "*"}}"#);
        write_package(dir.path(), "b", r#"{"dependencies": {"c": "*"}}"#);
        write_package(dir.path(), "c", r#"{"dependencies": {"a": "*"}}"#);

        resolver.resolve_package("a", None).await.unwrap();

        let cycles = resolver.graph().detect_cycles();
        assert_eq!(cycles.len(), 1);
        let members: std::collections::HashSet<&str> =
            cycles[0].iter().map(String::as_str).collect();
        assert_eq!(members, ["a", "b", "c"].into_iter().collect());

        assert!(resolver.graph().topological_sort().is_err());
        assert!(resolver.validate().is_err());

        let detector = ConflictDetector::new(resolver.graph());
        let conflicts = detector.detect_circular_dependencies();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Circular);
    }

    #[tokio::test]
    async fn test_two_cycle_detected() {
        let (dir, mut resolver) = project();
        write_package(dir.path(), "a", r#"{"dependencies": {"b": "*"}}"#);
        write_package(dir.path(), "b", r#"{"dependencies": {"a": "*"}}"#);

        resolver.resolve_package("a", None).await.unwrap();

        let cycles = resolver.graph().detect_cycles();
        assert!(!cycles.is_empty());
        let members: std::collections::HashSet<&str> =
            cycles[0].iter().map(String::as_str).collect();
        assert_eq!(members, ["a", "b"].into_iter().collect());
    }

    #[tokio::test]
    async fn test_graph_acyclic_when_resolution_succeeds() {
        let (dir, mut resolver) = project();
        write_package(
            dir.path(),
            "app",
            r#"{"dependencies": {"fmt": "*", "spdlog": "*"}}"#,
        );
        write_package(dir.path(), "fmt", r#"{"dependencies": {}}"#);
        write_package(dir.path(), "spdlog", r#"{"dependencies": {"fmt": "*"}}"#);

        resolver.resolve_package("app", None).await.unwrap();
        assert!(resolver.graph().detect_cycles().is_empty());
        assert!(resolver.graph().topological_sort().is_ok());
    }

    #[tokio::test]
    async fn test_missing_repository_url_is_not_found() {
        let (_dir, mut resolver) = project();
        let err = resolver
            .resolve_package("completely-unknown-package", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_incremental_cache_hit_scenario() {
        let (dir, resolver) = project();
        write_package(
            dir.path(),
            "pkg",
            r#"{"dependencies": {"fmt": "=8.1.1", "zlib": "*"}}"#,
        );

        let parser = resolver.parser();
        let mut graph = paker::dependency::DependencyGraph::new();

        let first = parser
            .parse_package(&mut graph, "pkg", Some("1.0"))
            .await
            .unwrap();
        assert!(!first.cache_hit);

        // Re-parse without altering the manifest: one full parse, one
        // cache hit, identical dependency lists.
        let second = parser
            .parse_package_with_strategy(
                &mut graph,
                "pkg",
                Some("1.0"),
                ParseStrategy::Incremental,
            )
            .await
            .unwrap();
        assert!(second.cache_hit);
        assert_eq!(first.dependencies, second.dependencies);

        let stats = parser.stats();
        assert_eq!(stats.full_parses, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.total_packages_parsed, 2);
    }

    #[tokio::test]
    async fn test_remotes_extend_repository_map() {
        let (dir, mut resolver) = project();
        std::fs::write(
            dir.path().join("paker.json"),
            r#"{
                "dependencies": {"inhouse": "*"},
                "remotes": [{"name": "inhouse", "url": "https://git.example.com/inhouse.git"}]
            }"#,
        )
        .unwrap();
        write_package(dir.path(), "inhouse", r#"{"dependencies": {}}"#);

        resolver.resolve_project().await.unwrap();
        assert_eq!(
            resolver.repository_url("inhouse"),
            Some("https://git.example.com/inhouse.git")
        );
        assert_eq!(
            resolver.graph().node("inhouse").unwrap().repository.as_deref(),
            Some("https://git.example.com/inhouse.git")
        );
    }
}
