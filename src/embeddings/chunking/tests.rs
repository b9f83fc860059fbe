use super::*;

fn small_config(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
    ChunkingConfig {
        chunk_size,
        chunk_overlap,
    }
}

#[test]
fn short_note_is_one_chunk() {
    let content = "# Title\n\nA short paragraph.\n\n- item one\n- item two\n";
    let chunks = split_markdown(content, &ChunkingConfig::default());

    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].starts_with("# Title"));
    assert!(chunks[0].contains("- item two"));
}

#[test]
fn empty_note_has_no_chunks() {
    assert!(split_markdown("", &ChunkingConfig::default()).is_empty());
    assert!(split_markdown("   \n\n  ", &ChunkingConfig::default()).is_empty());
}

#[test]
fn chunks_never_exceed_size() {
    let paragraph = "Sentences keep going and going without a break. ".repeat(20);
    let content =
        format!("# One\n\n{paragraph}\n\n## Two\n\n{paragraph}\n\n## Three\n\n{paragraph}");
    let config = small_config(300, 50);

    let chunks = split_markdown(&content, &config);

    assert!(chunks.len() > 3);
    for chunk in &chunks {
        assert!(
            chunk.chars().count() <= 300,
            "chunk of {} chars exceeds limit",
            chunk.chars().count()
        );
    }
}

#[test]
fn one_giant_word_is_cut_by_characters() {
    let content = "x".repeat(1050);
    let chunks = split_markdown(&content, &small_config(500, 0));

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].len(), 500);
    assert_eq!(chunks[2].len(), 50);
}

#[test]
fn multibyte_text_is_split_on_char_boundaries() {
    let content = "ünïcödé wörds ".repeat(100);
    let chunks = split_markdown(&content, &small_config(120, 20));

    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(chunk.chars().count() <= 120);
    }
}

#[test]
fn code_blocks_stay_whole_when_they_fit() {
    let code = "```rust\nfn main() {\n    println!(\"# not a heading\");\n}\n```";
    let filler = "Filler text for the section. ".repeat(6);
    let content = format!("{filler}\n\n{code}\n\n{filler}");

    let chunks = split_markdown(&content, &small_config(200, 0));

    assert!(chunks.iter().any(|chunk| chunk.contains(code)));
}

#[test]
fn overlap_repeats_trailing_words() {
    let first = "alpha beta gamma delta epsilon. ".repeat(3);
    let second = "zeta eta theta iota kappa. ".repeat(3);
    let content = format!("{}\n\n{}", first.trim(), second.trim());

    let chunks = split_markdown(&content, &small_config(110, 20));

    assert_eq!(chunks.len(), 2);
    assert!(chunks[1].starts_with("gamma delta epsilon.\n\nzeta"));
}

#[test]
fn splitting_is_deterministic() {
    let content = "# Heading\n\nSome content here. ".repeat(50);
    let config = small_config(250, 30);

    assert_eq!(
        split_markdown(&content, &config),
        split_markdown(&content, &config)
    );
}

#[test]
fn contextual_chunk_header() {
    let chunk = create_contextual_chunk("body text", "My Note", "{\"a\":1}", false);

    assert_eq!(
        chunk,
        "\n\nNOTE TITLE: [[My Note]]\n\nMETADATA:{\"a\":1}\n\nNOTE BLOCK CONTENT:\n\nbody text"
    );
}

#[test]
fn continued_chunk_is_marked() {
    let chunk = create_contextual_chunk("more", "Note", "{}", true);
    assert!(chunk.ends_with("NOTE BLOCK CONTENT:\n\n(cont'd) more"));
}

#[test]
fn content_hash_is_stable() {
    let first = content_hash("same text");
    let second = content_hash("same text");
    let other = content_hash("other text");

    assert_eq!(first, second);
    assert_ne!(first, other);
    assert_eq!(first.len(), 64);
}
