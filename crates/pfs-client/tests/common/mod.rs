//! In-process cluster harness for client integration tests.

use pfs_client::{Client, ClientConfig, ClusterList};
use pfs_meta::MetaServer;
use pfs_node::NodeServer;

pub struct TestCluster {
    pub list: ClusterList,
    /// Storage directories, index = node index.
    pub node_dirs: Vec<tempfile::TempDir>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl TestCluster {
    /// Starts a metadata server and `node_count` storage nodes on
    /// ephemeral ports.
    pub async fn start(node_count: usize) -> TestCluster {
        let meta = MetaServer::bind("127.0.0.1:0", node_count as u32)
            .await
            .expect("bind metadata server");
        let meta_addr = meta.local_addr().expect("metadata address").to_string();
        let mut handles = vec![tokio::spawn(async move {
            let _ = meta.run().await;
        })];

        let mut nodes = Vec::new();
        let mut node_dirs = Vec::new();
        for _ in 0..node_count {
            let dir = tempfile::tempdir().expect("node storage dir");
            let node = NodeServer::bind("127.0.0.1:0", dir.path())
                .await
                .expect("bind storage node");
            nodes.push(node.local_addr().expect("node address").to_string());
            handles.push(tokio::spawn(async move {
                let _ = node.run().await;
            }));
            node_dirs.push(dir);
        }

        TestCluster {
            list: ClusterList {
                meta: meta_addr,
                nodes,
            },
            node_dirs,
            handles,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.list.clone())
    }

    pub async fn client(&self) -> Client {
        Client::initialize(self.config())
            .await
            .expect("client initialization")
    }

    pub async fn client_with_cache(&self, cache_blocks: usize) -> Client {
        Client::initialize(self.config().with_cache_blocks(cache_blocks))
            .await
            .expect("client initialization")
    }

    /// Raw bytes a storage node holds for `name`, empty if absent.
    pub fn node_file(&self, node_index: usize, name: &str) -> Vec<u8> {
        std::fs::read(self.node_dirs[node_index].path().join(name)).unwrap_or_default()
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
