//! Trivial Graph Format reader.
//!
//! ```text
//! t0 top
//! p0 normal
//! p1 normal
//! #
//! t0 p0
//! p0 p1 0 0
//! ```
//!
//! Vertex lines are `<name> <kind>`, where the kind is a factory key. A line
//! holding `#` ends the vertex section; each following line is an edge
//! `<from> <to>` with optional `<from_port> <to_port>` (both default to 0).

use crate::dsl::{DslError, TopologyBuilder};
use crate::graph::{PortId, Topology};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Format tag of TGF in the `tgf-format` configuration key.
pub const FORMAT_TGF: i64 = 1;

#[derive(Debug, Error)]
pub enum TgfError {
    #[error("cannot read topology file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: {source}")]
    Topology {
        line: usize,
        #[source]
        source: DslError,
    },
}

fn syntax(line: usize, message: impl Into<String>) -> TgfError {
    TgfError::Syntax {
        line,
        message: message.into(),
    }
}

fn port(line: usize, token: &str) -> Result<PortId, TgfError> {
    token
        .parse::<usize>()
        .map(PortId)
        .map_err(|_| syntax(line, format!("invalid port `{token}`")))
}

/// Parse TGF text into a topology.
///
/// # Errors
///
/// * If a line does not have the expected number of fields
/// * If a port is not a non-negative integer
/// * If a vertex is declared twice or an edge names an unknown vertex
pub fn parse(text: &str) -> Result<Topology, TgfError> {
    let mut builder = TopologyBuilder::new();
    let mut in_edges = false;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let content = raw.trim();
        if content.is_empty() {
            continue;
        }
        if content == "#" {
            if in_edges {
                return Err(syntax(line, "second `#` separator"));
            }
            in_edges = true;
            continue;
        }

        let fields: Vec<&str> = content.split_whitespace().collect();
        let topology_err = |source| TgfError::Topology { line, source };
        if in_edges {
            let (from_port, to_port) = match fields.len() {
                2 => (PortId(0), PortId(0)),
                4 => (port(line, fields[2])?, port(line, fields[3])?),
                n => return Err(syntax(line, format!("edge expects 2 or 4 fields, got {n}"))),
            };
            let from = builder.lookup(fields[0]).map_err(topology_err)?;
            let to = builder.lookup(fields[1]).map_err(topology_err)?;
            builder
                .connect(from, from_port, to, to_port)
                .map_err(topology_err)?;
        } else {
            if fields.len() != 2 {
                return Err(syntax(
                    line,
                    format!("vertex expects `<name> <kind>`, got {} fields", fields.len()),
                ));
            }
            builder
                .node_named(fields[0], fields[1])
                .map_err(topology_err)?;
        }
    }

    Ok(builder.build())
}

/// Read and parse a TGF file.
///
/// # Errors
///
/// * If the file cannot be read
/// * If its content is not valid TGF, see [`parse`]
pub fn load(path: &Path) -> Result<Topology, TgfError> {
    let text = std::fs::read_to_string(path).map_err(|source| TgfError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeId;

    #[test]
    fn parses_vertices_and_edges() {
        let topology = parse("t0 top\np0 normal\np1 normal\n#\nt0 p0\nt0 p1\np0 p1 0 0\n").unwrap();
        assert_eq!(topology.len(), 3);
        assert_eq!(topology.vertices[0].kind, "top");
        assert_eq!(topology.vertices[2].name, "p1");
        assert_eq!(topology.edges.len(), 3);
        assert_eq!(topology.in_degree(NodeId(2)), 2);
    }

    #[test]
    fn vertices_only_is_valid() {
        let topology = parse("a coupled\nb coupled\n").unwrap();
        assert_eq!(topology.len(), 2);
        assert!(topology.edges.is_empty());
    }

    #[test]
    fn unknown_vertex_reports_line() {
        let err = parse("a top\n#\na b\n").unwrap_err();
        assert!(matches!(err, TgfError::Topology { line: 3, .. }), "{err}");
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(matches!(parse("a\n"), Err(TgfError::Syntax { line: 1, .. })));
        assert!(matches!(
            parse("a top\n#\na a 0\n"),
            Err(TgfError::Syntax { line: 3, .. })
        ));
        assert!(matches!(
            parse("a top\n#\na a x 0\n"),
            Err(TgfError::Syntax { line: 3, .. })
        ));
        assert!(matches!(parse("a top\n#\n#\n"), Err(TgfError::Syntax { line: 3, .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load(Path::new("/nonexistent/pixelbench/s0.tgf")).unwrap_err();
        assert!(matches!(err, TgfError::Io { .. }));
    }
}
