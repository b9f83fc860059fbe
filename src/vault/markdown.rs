use std::sync::LazyLock;

use fancy_regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

/// Inline `#tag` not glued to a word, path, or link
static INLINE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?<![\w/&#\]\)(])#([\p{L}\p{N}_\-/]+)").expect("valid regex")
});
static WIKI_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<!!)\[\[([^\[\]\n]+?)\]\]").expect("valid regex"));
static EMBED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[\[([^\[\]\n]+?)\]\]").expect("valid regex"));
/// Fenced code block, closed by the same fence that opened it
static FENCED_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^[ \t]*(`{3,}|~{3,}).*?^[ \t]*\1[ \t]*$").expect("valid regex")
});
static INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`[^`\n]+`").expect("valid regex"));

/// Metadata extracted from a markdown note
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedNote {
    /// YAML frontmatter as JSON, empty when absent or malformed
    pub frontmatter: Map<String, Value>,
    /// Note text with the frontmatter removed
    pub body: String,
    /// Raw tags from frontmatter and inline `#tags`, in order of appearance
    pub tags: Vec<String>,
    /// Raw `[[wiki-link]]` targets
    pub links: Vec<String>,
    /// Raw `![[embed]]` targets
    pub embeds: Vec<String>,
}

/// Split a note into frontmatter and body, and collect its tags and links
#[inline]
pub fn parse_note(content: &str) -> ParsedNote {
    let (frontmatter, body) = split_frontmatter(content);

    let mut tags = frontmatter_tags(&frontmatter);
    let prose = strip_code(body);
    tags.extend(captures(&INLINE_TAG, &prose).into_iter().filter(|tag| {
        // Obsidian does not treat purely numeric strings as tags
        tag.chars().any(|c| !c.is_ascii_digit() && c != '/')
    }));

    ParsedNote {
        links: captures(&WIKI_LINK, &prose),
        embeds: captures(&EMBED, &prose),
        frontmatter,
        body: body.to_string(),
        tags,
    }
}

fn split_frontmatter(content: &str) -> (Map<String, Value>, &str) {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return (Map::new(), content);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (parse_yaml(yaml), body);
        }
        offset += line.len();
    }

    (Map::new(), content)
}

fn parse_yaml(yaml: &str) -> Map<String, Value> {
    if yaml.trim().is_empty() {
        return Map::new();
    }

    let parsed: serde_yaml::Value = match serde_yaml::from_str(yaml) {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring malformed frontmatter: {}", e);
            return Map::new();
        }
    };

    match serde_json::to_value(parsed) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            warn!("Frontmatter is not representable as JSON: {}", e);
            Map::new()
        }
    }
}

fn frontmatter_tags(frontmatter: &Map<String, Value>) -> Vec<String> {
    let value = frontmatter.get("tags").or_else(|| frontmatter.get("tag"));
    match value {
        Some(Value::String(list)) => list
            .split([',', ' '])
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(ToString::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(tag) => Some(tag.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|tag| !tag.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Blank out code so tags and links inside it are ignored
fn strip_code(body: &str) -> String {
    let mut text = body.to_string();
    for regex in [&*FENCED_CODE, &*INLINE_CODE] {
        text = regex.replace_all(&text, " ").into_owned();
    }
    text
}

fn captures(regex: &Regex, text: &str) -> Vec<String> {
    regex
        .captures_iter(text)
        .filter_map(|caps| match caps {
            Ok(caps) => caps.get(1).map(|m| m.as_str().trim().to_string()),
            Err(e) => {
                warn!("Pattern matching failed: {}", e);
                None
            }
        })
        .filter(|capture| !capture.is_empty())
        .collect()
}
