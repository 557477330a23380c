mod graph;
mod order;

pub use graph::{
    dependency_names, edge_map, resolve_to_objects, reverse_dependency_names, DependencyNode,
    Direction,
};
pub use order::topological_sort;
