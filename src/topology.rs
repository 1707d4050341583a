use many_cpus::ProcessorSet;
use tracing::debug;

/// Maps a NUMA node and a per-node slot index to a logical CPU id.
pub trait Topology: Send + Sync {
    fn num_nodes(&self) -> usize;

    /// Logical CPUs belonging to `node`, in ascending order.
    fn cpus_in_node(&self, node: usize) -> &[usize];

    /// The `slot`-th logical CPU of `node`, or `None` when the node has no such CPU.
    fn cpu_id_in_node(&self, node: usize, slot: usize) -> Option<usize> {
        self.cpus_in_node(node).get(slot).copied()
    }
}

/// CPU lists per NUMA node (memory region), indexed by node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaTopology {
    nodes: Vec<Vec<usize>>,
}

impl NumaTopology {
    pub fn from_nodes(nodes: Vec<Vec<usize>>) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|mut cpus| {
                cpus.sort_unstable();
                cpus.dedup();
                cpus
            })
            .collect();
        Self { nodes }
    }

    /// Group `(processor id, memory region id)` pairs by region. Region ids
    /// with no processors stay as empty nodes so indices match node ids.
    pub fn from_processors(processors: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let mut nodes: Vec<Vec<usize>> = Vec::new();
        for (cpu, region) in processors {
            if nodes.len() <= region {
                nodes.resize_with(region + 1, Vec::new);
            }
            nodes[region].push(cpu);
        }
        Self::from_nodes(nodes)
    }

    /// Topology of every processor the current process may run on.
    pub fn detect() -> Self {
        let topology = Self::from_processors(
            ProcessorSet::all()
                .processors()
                .iter()
                .map(|p| (p.id() as usize, p.memory_region_id() as usize)),
        );
        debug!(
            nodes = topology.num_nodes(),
            cpus = topology.nodes.iter().map(Vec::len).sum::<usize>(),
            "detected processor topology"
        );
        topology
    }
}

impl Topology for NumaTopology {
    fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn cpus_in_node(&self, node: usize) -> &[usize] {
        self.nodes.get(node).map(Vec::as_slice).unwrap_or(&[])
    }
}
