pub use affinity_propagation::{AffinityPropagation, ClusterResult};
pub use config::{ApConfig, Placement, Topology, WorkerAddress};
pub use error::ApError;
pub use preference::Preference;
pub use similarity::{NegCosine, NegEuclidean, Similarity};
pub use source::{DenseSimilarity, PointVectors, SimilaritySource};

mod affinity_propagation;
mod aggregate;
mod config;
mod dispatch;
mod error;
mod message;
mod node;
mod preference;
mod similarity;
mod source;
