//! On-disk index format.
//!
//! An index is two files sharing a prefix:
//!
//! - `<prefix>.graph` — header: magic `STRG` (4 bytes), then LE `u32`
//!   version, vertex count, degree cap `R`, entry-point id. Body: per
//!   vertex a LE `u32` degree followed by that many LE `u32` neighbor
//!   ids, in adjacency order.
//! - `<prefix>.data` — the point store blob: LE `u32` `(N, D)` then
//!   `N × D` elements.
//!
//! Loading rejects unknown magic or version, degrees above `R`, neighbor
//! ids at or past `N`, short files, and trailing bytes — all as
//! [`StratumError::MalformedInput`]. Nothing partially constructed is
//! returned on error.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::distance::Element;
use crate::error::{Result, StratumError};
use crate::graph::{AdjList, Graph};
use crate::points::PointStore;

const GRAPH_MAGIC: &[u8; 4] = b"STRG";
const FORMAT_VERSION: u32 = 1;

fn graph_path(prefix: &Path) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".graph");
    PathBuf::from(name)
}

fn data_path(prefix: &Path) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".data");
    PathBuf::from(name)
}

pub(crate) fn write_graph(prefix: &Path, graph: &Graph) -> Result<()> {
    let mut writer = BufWriter::new(File::create(graph_path(prefix))?);
    writer.write_all(GRAPH_MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&(graph.num_vertices() as u32).to_le_bytes())?;
    writer.write_all(&graph.max_degree().to_le_bytes())?;
    writer.write_all(&graph.entry_point().to_le_bytes())?;

    for v in 0..graph.num_vertices() as u32 {
        let neighbors = graph.neighbors(v);
        writer.write_all(&(neighbors.len() as u32).to_le_bytes())?;
        for &nb in neighbors {
            writer.write_all(&nb.to_le_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}

pub(crate) fn read_graph(prefix: &Path) -> Result<Graph> {
    let mut reader = BufReader::new(File::open(graph_path(prefix))?);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(map_eof)?;
    if &magic != GRAPH_MAGIC {
        return Err(StratumError::MalformedInput(
            "unknown graph file magic".to_string(),
        ));
    }
    let version = read_u32(&mut reader)?;
    if version != FORMAT_VERSION {
        return Err(StratumError::MalformedInput(format!(
            "unknown graph format version {version}"
        )));
    }
    let num = read_u32(&mut reader)? as usize;
    let max_degree = read_u32(&mut reader)?;
    let entry = read_u32(&mut reader)?;
    if num > 0 && entry as usize >= num {
        return Err(StratumError::MalformedInput(format!(
            "entry point {entry} is out of range for {num} vertices"
        )));
    }

    let mut adj = Vec::with_capacity(num);
    for v in 0..num {
        let degree = read_u32(&mut reader)?;
        if degree > max_degree {
            return Err(StratumError::MalformedInput(format!(
                "vertex {v} declares degree {degree}, above the cap {max_degree}"
            )));
        }
        let mut list = AdjList::with_capacity(degree as usize);
        for _ in 0..degree {
            let nb = read_u32(&mut reader)?;
            if nb as usize >= num {
                return Err(StratumError::MalformedInput(format!(
                    "vertex {v} references neighbor {nb}, past {num} vertices"
                )));
            }
            list.push(nb);
        }
        adj.push(list);
    }
    expect_eof(&mut reader, "graph")?;

    Ok(Graph::from_parts(adj, entry, max_degree))
}

pub(crate) fn write_points<T: Element>(prefix: &Path, points: &PointStore<T>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(data_path(prefix))?);
    points.write_to(&mut writer)?;
    writer.flush()?;
    Ok(())
}

pub(crate) fn read_points<T: Element>(prefix: &Path) -> Result<PointStore<T>> {
    let mut reader = BufReader::new(File::open(data_path(prefix))?);
    let points = PointStore::read_from(&mut reader)?;
    expect_eof(&mut reader, "data")?;
    Ok(points)
}

fn read_u32(reader: &mut dyn Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(map_eof)?;
    Ok(u32::from_le_bytes(buf))
}

/// Short reads mean the file disagrees with its own header.
fn map_eof(e: std::io::Error) -> StratumError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        StratumError::MalformedInput("file shorter than its header declares".to_string())
    } else {
        StratumError::Io(e)
    }
}

fn expect_eof(reader: &mut dyn Read, which: &str) -> Result<()> {
    let mut probe = [0u8; 1];
    match reader.read(&mut probe)? {
        0 => Ok(()),
        _ => Err(StratumError::MalformedInput(format!(
            "{which} file has trailing bytes"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tiny_graph() -> Graph {
        let adj = vec![
            AdjList::from_slice(&[1, 2]),
            AdjList::from_slice(&[0]),
            AdjList::from_slice(&[1, 0]),
        ];
        Graph::from_parts(adj, 2, 4)
    }

    #[test]
    fn graph_round_trips() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("idx");
        write_graph(&prefix, &tiny_graph()).unwrap();

        let back = read_graph(&prefix).unwrap();
        assert_eq!(back.num_vertices(), 3);
        assert_eq!(back.entry_point(), 2);
        assert_eq!(back.max_degree(), 4);
        assert_eq!(back.neighbors(0), &[1, 2]);
        assert_eq!(back.neighbors(2), &[1, 0]);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("idx");
        write_graph(&prefix, &tiny_graph()).unwrap();

        let path = graph_path(&prefix);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] = b'X';
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            read_graph(&prefix),
            Err(StratumError::MalformedInput(_))
        ));
    }

    #[test]
    fn truncated_graph_is_rejected() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("idx");
        write_graph(&prefix, &tiny_graph()).unwrap();

        let path = graph_path(&prefix);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        assert!(matches!(
            read_graph(&prefix),
            Err(StratumError::MalformedInput(_))
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("idx");
        write_graph(&prefix, &tiny_graph()).unwrap();

        let path = graph_path(&prefix);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.push(0);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            read_graph(&prefix),
            Err(StratumError::MalformedInput(_))
        ));
    }

    #[test]
    fn degree_above_cap_is_rejected() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("idx");
        let adj = vec![AdjList::from_slice(&[1, 2, 0]), AdjList::new(), AdjList::new()];
        // Written with cap 3, then the header's cap is lowered below the
        // stored degree.
        write_graph(&prefix, &Graph::from_parts(adj, 0, 3)).unwrap();

        let path = graph_path(&prefix);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[12..16].copy_from_slice(&2u32.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            read_graph(&prefix),
            Err(StratumError::MalformedInput(_))
        ));
    }
}
