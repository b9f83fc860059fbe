use super::*;

fn canonicals(tags: &[&NormalizedTagPath]) -> Vec<String> {
    tags.iter().map(|tag| tag.canonical.clone()).collect()
}

#[test]
fn normalize_strips_hashes_and_empty_segments() {
    let tag = normalize_tag_path("##economics//industrial-organization/ cournot /")
        .expect("tag should normalize");

    assert_eq!(tag.canonical, "#economics/industrial-organization/cournot");
    assert_eq!(
        tag.segments,
        vec!["economics", "industrial-organization", "cournot"]
    );
    assert_eq!(
        tag.hierarchical_paths,
        vec![
            "#economics",
            "#economics/industrial-organization",
            "#economics/industrial-organization/cournot",
        ]
    );
}

#[test]
fn normalize_rejects_segmentless_input() {
    assert!(normalize_tag_path("").is_none());
    assert!(normalize_tag_path("   ").is_none());
    assert!(normalize_tag_path("###").is_none());
    assert!(normalize_tag_path("#//").is_none());
}

#[test]
fn normalization_is_idempotent() {
    for raw in ["#a/b/c", "a", "  ##project/alpha  ", "x//y"] {
        let first = normalize_tag_path(raw).expect("tag should normalize");
        let second = normalize_tag_path(&first.canonical).expect("canonical should normalize");

        assert_eq!(first.canonical, second.canonical);
        assert_eq!(first.hierarchical_paths, second.hierarchical_paths);
        assert_eq!(first.segments, second.segments);
    }
}

#[test]
fn hierarchy_invariants_hold() {
    let tag = normalize_tag_path("#one/two/three/four").expect("tag should normalize");
    assert_eq!(tag.hierarchical_paths.len(), tag.segments.len());
    assert_eq!(tag.hierarchical_paths.last(), Some(&tag.canonical));

    let edges: Vec<(&str, &str)> = tag.hierarchy_edges().collect();
    assert_eq!(
        edges,
        vec![
            ("#one", "#one/two"),
            ("#one/two", "#one/two/three"),
            ("#one/two/three", "#one/two/three/four"),
        ]
    );
}

#[test]
fn normalize_many_deduplicates_and_sorts() {
    let tags = normalize_tag_paths(["#zeta", "alpha/beta", "##alpha/beta", "", "#", "#alpha"]);
    let canonicals: Vec<&str> = tags.iter().map(|tag| tag.canonical.as_str()).collect();
    assert_eq!(canonicals, vec!["#alpha", "#alpha/beta", "#zeta"]);
}

#[test]
fn expand_prefixes_of_canonical_tag() {
    assert_eq!(
        expand_canonical_prefixes("#a/b/c"),
        vec!["#a", "#a/b", "#a/b/c"]
    );
    assert!(expand_canonical_prefixes("#").is_empty());
}

#[test]
fn prefix_matching_is_hierarchy_aware() {
    let tags = normalize_tag_paths(["#a/b", "#a/b/c", "#a", "#other"]);
    let filtered = filter_tags_by_prefixes(&tags, &["#a/b".to_string()], false);

    assert_eq!(canonicals(&filtered), vec!["#a/b", "#a/b/c"]);
}

#[test]
fn prefix_without_hash_still_matches() {
    let tags = normalize_tag_paths(["#parent/child", "#standalone"]);
    let filtered = filter_tags_by_prefixes(&tags, &["parent".to_string()], false);

    assert_eq!(canonicals(&filtered), vec!["#parent/child"]);
}

#[test]
fn index_all_or_empty_prefixes_keep_everything() {
    let tags = normalize_tag_paths(["#a", "#b/c"]);

    assert_eq!(filter_tags_by_prefixes(&tags, &[], false).len(), 2);
    assert_eq!(
        filter_tags_by_prefixes(&tags, &["#zzz".to_string()], true).len(),
        2
    );
    assert!(filter_tags_by_prefixes(&tags, &["#zzz".to_string()], false).is_empty());
}
