//! Cluster bootstrap list.
//!
//! A line-oriented text file names every process in the cluster: line 1 is
//! the metadata service as `host:port`, each following non-empty line one
//! storage node. Node order defines node indices.

use std::path::Path;

use pfs_msg::MAX_STORAGE_NODES;

use crate::TransportError;

/// Parsed bootstrap list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterList {
    /// Metadata service address.
    pub meta: String,
    /// Storage node addresses, index = node index.
    pub nodes: Vec<String>,
}

impl ClusterList {
    /// Loads and parses a bootstrap file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    /// Parses bootstrap text. Blank lines are ignored.
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

        let meta = lines
            .next()
            .ok_or_else(|| TransportError::InvalidClusterList("empty list".to_string()))?;
        check_addr(meta)?;

        let mut nodes = Vec::new();
        for line in lines {
            check_addr(line)?;
            nodes.push(line.to_string());
        }

        if nodes.is_empty() {
            return Err(TransportError::InvalidClusterList(
                "no storage nodes listed".to_string(),
            ));
        }
        if nodes.len() > MAX_STORAGE_NODES {
            return Err(TransportError::InvalidClusterList(format!(
                "{} storage nodes listed, at most {MAX_STORAGE_NODES} supported",
                nodes.len()
            )));
        }

        Ok(ClusterList {
            meta: meta.to_string(),
            nodes,
        })
    }

    /// Number of storage nodes in the cluster.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn check_addr(line: &str) -> Result<(), TransportError> {
    match line.split_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(TransportError::InvalidClusterList(format!(
            "expected host:port, got {line:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        let list = ClusterList::parse("meta:9000\nnode0:9001\nnode1:9002\n").unwrap();
        assert_eq!(list.meta, "meta:9000");
        assert_eq!(list.nodes, vec!["node0:9001", "node1:9002"]);
        assert_eq!(list.node_count(), 2);
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let list = ClusterList::parse("\nmeta:9000\n\nnode0:9001\n\n").unwrap();
        assert_eq!(list.node_count(), 1);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ClusterList::parse("").is_err());
        assert!(ClusterList::parse("meta:9000\n").is_err());
        assert!(ClusterList::parse("meta:9000\nnot-an-address\n").is_err());
        assert!(ClusterList::parse("meta:badport\nnode0:9001\n").is_err());

        let too_many: String = std::iter::once("meta:9000".to_string())
            .chain((0..MAX_STORAGE_NODES + 1).map(|i| format!("node{i}:9001")))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(ClusterList::parse(&too_many).is_err());
    }
}
