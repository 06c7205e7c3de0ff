use tunnelpass_core::NodeDescriptor;

/// Fixed node registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticSource {
    nodes: Vec<NodeDescriptor>,
}

impl StaticSource {
    pub fn new(nodes: Vec<NodeDescriptor>) -> Self {
        Self { nodes }
    }

    /// Compiled-in registry: a local development node
    pub fn builtin() -> Self {
        Self::new(vec![NodeDescriptor::new("local-dev", "http://localhost:9090", "local")
            .with_backends(["openvpn", "wireguard"])])
    }

    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }
}
