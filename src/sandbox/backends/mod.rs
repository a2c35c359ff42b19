mod node;

pub use node::NodeBackend;
