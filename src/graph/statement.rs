use crate::tags::NormalizedTagPath;

/// Note-to-note relationship kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkKind {
    WikiLink,
    Embed,
}

impl LinkKind {
    #[inline]
    pub fn relationship_type(self) -> &'static str {
        match self {
            Self::WikiLink => "LINKS_TO",
            Self::Embed => "EMBEDS",
        }
    }
}

/// One write against the graph, independent of the driver executing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphStatement {
    /// Upsert the `Note` node and refresh its properties
    MergeNote {
        note_id: String,
        path: String,
        updated_at: i64,
    },
    /// Delete `HAS_TAG` edges from the note to tags outside `keep`
    PruneTags { note_id: String, keep: Vec<String> },
    /// Upsert a `Tag` node and the `HAS_TAG` edge from the note
    MergeTag {
        note_id: String,
        tag: NormalizedTagPath,
    },
    /// Upsert both tags of a hierarchy step and the `PARENT_OF` edge between them
    MergeTagParent {
        parent: NormalizedTagPath,
        child: NormalizedTagPath,
    },
    /// Delete outbound links of `kind` to targets outside `keep`
    PruneLinks {
        note_id: String,
        kind: LinkKind,
        keep: Vec<String>,
    },
    /// Upsert target stubs and outbound links of `kind`
    MergeLinks {
        note_id: String,
        kind: LinkKind,
        targets: Vec<String>,
    },
    /// Remove the note and all of its relationships
    DeleteNote { note_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    List(Vec<String>),
}

/// Parameterized Cypher text for a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CypherQuery {
    pub text: String,
    pub params: Vec<(&'static str, ParamValue)>,
}

impl GraphStatement {
    #[inline]
    pub fn to_cypher(&self) -> CypherQuery {
        match self {
            Self::MergeNote {
                note_id,
                path,
                updated_at,
            } => CypherQuery {
                text: "MERGE (n:Note {id: $noteId}) \
                       SET n.path = $path, n.updatedAt = $updatedAt"
                    .to_string(),
                params: vec![
                    ("noteId", ParamValue::Str(note_id.clone())),
                    ("path", ParamValue::Str(path.clone())),
                    ("updatedAt", ParamValue::Int(*updated_at)),
                ],
            },
            Self::PruneTags { note_id, keep } => CypherQuery {
                text: "MATCH (n:Note {id: $noteId})-[r:HAS_TAG]->(t:Tag) \
                       WHERE NOT t.canonical IN $keep \
                       DELETE r"
                    .to_string(),
                params: vec![
                    ("noteId", ParamValue::Str(note_id.clone())),
                    ("keep", ParamValue::List(keep.clone())),
                ],
            },
            Self::MergeTag { note_id, tag } => CypherQuery {
                text: "MATCH (n:Note {id: $noteId}) \
                       MERGE (t:Tag {canonical: $canonical}) \
                       SET t.segments = $segments, t.hierarchicalPaths = $hierarchicalPaths \
                       MERGE (n)-[:HAS_TAG]->(t)"
                    .to_string(),
                params: vec![
                    ("noteId", ParamValue::Str(note_id.clone())),
                    ("canonical", ParamValue::Str(tag.canonical.clone())),
                    ("segments", ParamValue::List(tag.segments.clone())),
                    (
                        "hierarchicalPaths",
                        ParamValue::List(tag.hierarchical_paths.clone()),
                    ),
                ],
            },
            Self::MergeTagParent { parent, child } => CypherQuery {
                text: "MERGE (p:Tag {canonical: $parent}) \
                       ON CREATE SET p.segments = $parentSegments, \
                       p.hierarchicalPaths = $parentPaths \
                       MERGE (c:Tag {canonical: $child}) \
                       ON CREATE SET c.segments = $childSegments, \
                       c.hierarchicalPaths = $childPaths \
                       MERGE (p)-[:PARENT_OF]->(c)"
                    .to_string(),
                params: vec![
                    ("parent", ParamValue::Str(parent.canonical.clone())),
                    ("parentSegments", ParamValue::List(parent.segments.clone())),
                    (
                        "parentPaths",
                        ParamValue::List(parent.hierarchical_paths.clone()),
                    ),
                    ("child", ParamValue::Str(child.canonical.clone())),
                    ("childSegments", ParamValue::List(child.segments.clone())),
                    (
                        "childPaths",
                        ParamValue::List(child.hierarchical_paths.clone()),
                    ),
                ],
            },
            Self::PruneLinks {
                note_id,
                kind,
                keep,
            } => CypherQuery {
                text: format!(
                    "MATCH (n:Note {{id: $noteId}})-[r:{}]->(m:Note) \
                     WHERE NOT m.id IN $keep \
                     DELETE r",
                    kind.relationship_type()
                ),
                params: vec![
                    ("noteId", ParamValue::Str(note_id.clone())),
                    ("keep", ParamValue::List(keep.clone())),
                ],
            },
            Self::MergeLinks {
                note_id,
                kind,
                targets,
            } => CypherQuery {
                text: format!(
                    "MATCH (n:Note {{id: $noteId}}) \
                     UNWIND $targets AS target \
                     MERGE (m:Note {{id: target}}) \
                     ON CREATE SET m.path = target \
                     MERGE (n)-[:{}]->(m)",
                    kind.relationship_type()
                ),
                params: vec![
                    ("noteId", ParamValue::Str(note_id.clone())),
                    ("targets", ParamValue::List(targets.clone())),
                ],
            },
            Self::DeleteNote { note_id } => CypherQuery {
                text: "MATCH (n:Note {id: $noteId}) DETACH DELETE n".to_string(),
                params: vec![("noteId", ParamValue::Str(note_id.clone()))],
            },
        }
    }
}
