//! Graph files: canonical JSON (read/write) and GraphML (write only).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use serde_json::Value;
use tracing::info;

use super::document::DocumentGraph;
use crate::{Error, Result};

const LAYOUT_CENTER: f64 = 500.0;
const LAYOUT_RADIUS: f64 = 400.0;

/// Writes the graph as pretty-printed UTF-8 JSON, creating parent dirs.
pub fn save_json(graph: &DocumentGraph, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(graph)?;
    std::fs::write(path, json)?;
    info!("Graph saved to {}", path.display());
    Ok(())
}

/// Reads a graph written by [`save_json`]. Invariants are re-checked.
pub fn load_json(path: &Path) -> Result<DocumentGraph> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::TextSource {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        Error::SerializationError(format!("{}: {}", path.display(), e))
    })
}

/// Writes GraphML for external viewers.
pub fn write_graphml(graph: &DocumentGraph, path: &Path, with_layout: bool) -> Result<()> {
    ensure_parent(path)?;
    std::fs::write(path, to_graphml(graph, with_layout))?;
    info!("GraphML saved to {}", path.display());
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Boolean,
    Long,
    Double,
    Text,
}

impl KeyType {
    fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => KeyType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => KeyType::Long,
            Value::Number(_) => KeyType::Double,
            _ => KeyType::Text,
        }
    }

    fn widen(self, other: KeyType) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (KeyType::Long, KeyType::Double) | (KeyType::Double, KeyType::Long) => KeyType::Double,
            _ => KeyType::Text,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            KeyType::Boolean => "boolean",
            KeyType::Long => "long",
            KeyType::Double => "double",
            KeyType::Text => "string",
        }
    }
}

/// Renders the graph as GraphML. Node and edge attributes get typed
/// `<key>` declarations; nested values are JSON-encoded strings.
pub fn to_graphml(graph: &DocumentGraph, with_layout: bool) -> String {
    let nodes: Vec<(&str, BTreeMap<String, Value>)> = graph
        .entities()
        .iter()
        .map(|e| {
            let mut props = e.all_properties();
            props.remove("id");
            (e.id.as_str(), props)
        })
        .collect();
    let edges: Vec<(&str, &str, &str, BTreeMap<String, Value>)> = graph
        .relations()
        .iter()
        .map(|r| {
            let mut props = r.all_properties();
            for core in ["id", "source_entity_id", "target_entity_id"] {
                props.remove(core);
            }
            (
                r.id.as_str(),
                r.source_entity_id.as_str(),
                r.target_entity_id.as_str(),
                props,
            )
        })
        .collect();

    let mut node_keys = collect_keys(nodes.iter().map(|(_, p)| p));
    if with_layout {
        node_keys.insert("x".to_string(), KeyType::Double);
        node_keys.insert("y".to_string(), KeyType::Double);
    }
    let edge_keys = collect_keys(edges.iter().map(|(_, _, _, p)| p));

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n");
    for (name, kind) in &node_keys {
        write_key(&mut out, "node", "n", name, *kind);
    }
    for (name, kind) in &edge_keys {
        write_key(&mut out, "edge", "e", name, *kind);
    }

    let graph_id = graph.document_id().unwrap_or("G");
    let _ = writeln!(
        out,
        "  <graph id=\"{}\" edgedefault=\"directed\">",
        escape_xml(graph_id)
    );

    let count = nodes.len().max(1) as f64;
    for (i, (id, props)) in nodes.iter().enumerate() {
        let _ = writeln!(out, "    <node id=\"{}\">", escape_xml(id));
        for (name, value) in props {
            write_data(&mut out, "n", name, value);
        }
        if with_layout {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / count;
            let x = LAYOUT_CENTER + LAYOUT_RADIUS * angle.cos();
            let y = LAYOUT_CENTER + LAYOUT_RADIUS * angle.sin();
            let _ = writeln!(out, "      <data key=\"n_x\">{:.3}</data>", x);
            let _ = writeln!(out, "      <data key=\"n_y\">{:.3}</data>", y);
        }
        out.push_str("    </node>\n");
    }

    for (id, source, target, props) in &edges {
        let _ = writeln!(
            out,
            "    <edge id=\"{}\" source=\"{}\" target=\"{}\">",
            escape_xml(id),
            escape_xml(source),
            escape_xml(target)
        );
        for (name, value) in props {
            write_data(&mut out, "e", name, value);
        }
        out.push_str("    </edge>\n");
    }

    out.push_str("  </graph>\n</graphml>\n");
    out
}

fn collect_keys<'a>(
    maps: impl Iterator<Item = &'a BTreeMap<String, Value>>,
) -> BTreeMap<String, KeyType> {
    let mut keys: BTreeMap<String, KeyType> = BTreeMap::new();
    for props in maps {
        for (name, value) in props {
            let kind = KeyType::of(value);
            keys.entry(name.clone())
                .and_modify(|k| *k = k.widen(kind))
                .or_insert(kind);
        }
    }
    keys
}

fn write_key(out: &mut String, domain: &str, prefix: &str, name: &str, kind: KeyType) {
    let _ = writeln!(
        out,
        "  <key id=\"{}_{}\" for=\"{}\" attr.name=\"{}\" attr.type=\"{}\"/>",
        prefix,
        escape_xml(name),
        domain,
        escape_xml(name),
        kind.as_str()
    );
}

fn write_data(out: &mut String, prefix: &str, name: &str, value: &Value) {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let _ = writeln!(
        out,
        "      <data key=\"{}_{}\">{}</data>",
        prefix,
        escape_xml(name),
        escape_xml(&text)
    );
}

pub(crate) fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
